use std::time::{Duration, Instant};

use metrics_exporter_statsd::{StatsdBuilder, PACKET_SIZE_FAST_ETHERNET};

fn main() {
    tracing_subscriber::fmt::init();

    let client = StatsdBuilder::default()
        .with_remote_address("localhost:8125")
        .expect("failed to parse remote address")
        .with_packet_size(PACKET_SIZE_FAST_ETHERNET)
        .with_prefix("example")
        .with_flush_interval(Duration::from_millis(100))
        .build()
        .expect("failed to build StatsD client");

    // Loop over and over, pretending to do some work.
    let mut iterations = 0;
    loop {
        let started = Instant::now();

        client.counting("loop.iterations", 1);
        client.sampling("loop.hot_path", 0.1);
        client.gauge("loop.total", iterations);

        std::thread::sleep(Duration::from_millis(10));
        client.timing_duration("loop.duration", started.elapsed());

        iterations += 1;
    }
}
