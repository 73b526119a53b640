use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_statsd::StatsdBuilder;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256StarStar;

fn main() {
    tracing_subscriber::fmt::init();

    StatsdBuilder::default()
        .with_remote_address("localhost:8125")
        .expect("failed to parse remote address")
        .with_flush_interval(Duration::from_millis(500))
        .install()
        .expect("failed to install StatsD recorder");

    gauge!("testing").set(42.0);

    let server_loops = counter!("tcp_server_loops");
    let server_loops_delta_secs = histogram!("tcp_server_loop_delta_secs");

    let mut rng = Xoshiro256StarStar::seed_from_u64(42);

    // Loop over and over, pretending to do some work.
    loop {
        server_loops.increment(1);
        server_loops_delta_secs.record(rng.random_range(0.0..1.0));

        let gauge = gauge!("lucky_iterations");
        if rng.random_bool(0.75) {
            gauge.increment(1.0);
        } else {
            gauge.decrement(1.0);
        }

        std::thread::sleep(Duration::from_millis(5));
    }
}
