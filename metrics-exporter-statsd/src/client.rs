use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

use crate::{
    autoflush::AutoFlush,
    buffer::Buffer,
    format::{self, MetricType},
    sampling::{SampleSource, ThreadRngSampler},
    sink::Sink,
    transport::Transport,
};

/// Errors that could occur while operating a StatsD client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Failed to spawn the background thread for periodic flushing.
    #[error("failed to spawn background thread for periodic flushing")]
    Backend(#[source] std::io::Error),
}

/// A StatsD client.
///
/// Every metric is encoded as a single line and written to an internal [`Buffer`] as one transaction, so lines from
/// concurrent callers never interleave and a line is never split across two packets. Packets are sent once the buffer
/// reaches the configured packet size, when [`flush`][StatsdClient::flush] is called, or periodically if
/// [`auto_flush`][StatsdClient::auto_flush] is enabled.
///
/// None of the emission methods return errors or wait on the network: a packet that fails to send is dropped.
///
/// The client can be shared freely between threads.
pub struct StatsdClient<S: Sink + 'static = Transport> {
    buffer: Arc<Buffer<S>>,
    prefix: Option<String>,
    sampler: Box<dyn SampleSource>,
    autoflush: Mutex<Option<AutoFlush>>,
}

impl<S: Sink + 'static> StatsdClient<S> {
    /// Creates a client that writes packets of up to roughly `packet_size` bytes to `sink`.
    ///
    /// `slack` is the headroom reserved beyond `packet_size` for the line being written when a flush is triggered, and
    /// should fit the longest expected line.
    pub fn from_sink(sink: S, packet_size: usize, slack: usize) -> Self {
        let buffer = Buffer::new(packet_size, slack, sink).with_trailing_byte_trimmed(true);
        Self { buffer: Arc::new(buffer), prefix: None, sampler: Box::new(ThreadRngSampler), autoflush: Mutex::new(None) }
    }

    /// Sets the prefix prepended, with a `.` separator, to every bucket name.
    #[must_use]
    pub fn with_prefix<P: Into<String>>(mut self, prefix: P) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Sets the source of random draws used by [`sampling`][StatsdClient::sampling].
    #[must_use]
    pub fn with_sampler<R: SampleSource + 'static>(mut self, sampler: R) -> Self {
        self.sampler = Box::new(sampler);
        self
    }

    pub(crate) fn set_sampler(&mut self, sampler: Box<dyn SampleSource>) {
        self.sampler = sampler;
    }

    pub(crate) fn buffer(&self) -> &Arc<Buffer<S>> {
        &self.buffer
    }

    pub(crate) fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    fn metric(&self, bucket: &str, value: i64, metric_type: MetricType) {
        let mut tx = self.buffer.begin();
        format::write_int_line(&mut tx, self.prefix(), bucket, value, metric_type);
        tx.end();
    }

    /// Records a gauge value calculated on the client side, as `bucket:value|g`.
    pub fn gauge(&self, bucket: &str, value: i64) {
        self.metric(bucket, value, MetricType::Gauge);
    }

    /// Adds a delta to a counter that is summed on the server side, as `bucket:delta|c`.
    pub fn counting(&self, bucket: &str, delta: i64) {
        self.metric(bucket, delta, MetricType::Counter);
    }

    /// Records an event timing in milliseconds, as `bucket:millis|ms`.
    pub fn timing(&self, bucket: &str, millis: i64) {
        self.metric(bucket, millis, MetricType::Timing);
    }

    /// Records an event timing, truncated to whole milliseconds.
    pub fn timing_duration(&self, bucket: &str, duration: Duration) {
        let millis = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
        self.timing(bucket, millis);
    }

    /// Increments a counter `rate` of the time, as `bucket:1|c@rate`.
    ///
    /// The server scales the count back up by the rate, so hot paths can report a counter without emitting a line on
    /// every call.
    pub fn sampling(&self, bucket: &str, rate: f64) {
        if self.sampler.sample() > rate {
            return;
        }

        let mut tx = self.buffer.begin();
        format::write_sampled_line(&mut tx, self.prefix(), bucket, rate);
        tx.end();
    }

    /// Sends everything buffered so far.
    pub fn flush(&self) {
        self.buffer.flush();
    }

    /// Flushes the buffer every `period` on a background thread.
    ///
    /// If periodic flushing is already running, this does nothing unless `override_existing` is `true`, in which case
    /// the running flusher is stopped and replaced by one with the new period. The stopped flusher is not waited on, so
    /// it may still flush once more. A zero `period` is ignored.
    ///
    /// # Errors
    ///
    /// If the background thread cannot be spawned, an error is returned and any previous flusher keeps running.
    pub fn auto_flush(&self, period: Duration, override_existing: bool) -> Result<(), ClientError> {
        if period.is_zero() {
            return Ok(());
        }

        let mut autoflush = self.autoflush.lock();
        if let Some(existing) = autoflush.as_ref() {
            if !override_existing {
                debug!(existing_period = ?existing.period(), ?period, "Auto-flush already running, ignoring.");
                return Ok(());
            }
        }

        let replacement = AutoFlush::spawn(Arc::clone(&self.buffer), period).map_err(ClientError::Backend)?;
        *autoflush = Some(replacement);
        Ok(())
    }

    /// Returns the period of the running background flusher, if any.
    pub fn auto_flush_period(&self) -> Option<Duration> {
        self.autoflush.lock().as_ref().map(AutoFlush::period)
    }

    /// Stops periodic flushing, if it is running.
    ///
    /// The background thread is not waited on, so it may still flush once more.
    pub fn stop_auto_flush(&self) {
        self.autoflush.lock().take();
    }
}

impl<S: Sink + 'static> Drop for StatsdClient<S> {
    fn drop(&mut self) {
        self.autoflush.get_mut().take();
        self.buffer.flush();
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::Arc,
        thread::{self, sleep},
        time::{Duration, Instant},
    };

    use parking_lot::Mutex;
    use rand::SeedableRng as _;
    use rand_xoshiro::Xoshiro256StarStar;

    use super::StatsdClient;
    use crate::{sampling::SampleSource, sink::test_util::RecordingSink};

    /// Hands out a fixed sequence of draws.
    struct ScriptedSampler(Mutex<VecDeque<f64>>);

    impl ScriptedSampler {
        fn new(draws: &[f64]) -> Self {
            Self(Mutex::new(draws.iter().copied().collect()))
        }
    }

    impl SampleSource for ScriptedSampler {
        fn sample(&self) -> f64 {
            self.0.lock().pop_front().expect("ran out of scripted draws")
        }
    }

    fn client(packet_size: usize) -> (StatsdClient<RecordingSink>, RecordingSink) {
        let sink = RecordingSink::default();
        (StatsdClient::from_sink(sink.clone(), packet_size, 256), sink)
    }

    fn lines(sink: &RecordingSink) -> Vec<String> {
        sink.packet_strings().iter().flat_map(|p| p.split('\n').map(str::to_string).collect::<Vec<_>>()).collect()
    }

    #[test]
    fn line_formats() {
        let (client, sink) = client(512);

        client.gauge("foo.bar.gauge", 42);
        client.counting("foo.bar.counter", 1);
        client.counting("foo.bar.counter", -3);
        client.timing("foo.bar.timing", 153);
        client.timing_duration("foo.bar.timing", Duration::from_micros(2_500_900));
        client.flush();

        assert_eq!(
            sink.packet_strings(),
            vec![
                "foo.bar.gauge:42|g\nfoo.bar.counter:1|c\nfoo.bar.counter:-3|c\nfoo.bar.timing:153|ms\nfoo.bar.timing:2500|ms"
                    .to_string()
            ]
        );
    }

    #[test]
    fn prefix() {
        let sink = RecordingSink::default();
        let client = StatsdClient::from_sink(sink.clone(), 512, 256).with_prefix("server1");

        client.counting("requests", 1);
        client.flush();

        assert_eq!(sink.packet_strings(), vec!["server1.requests:1|c".to_string()]);
    }

    #[test]
    fn sampling_with_scripted_draws() {
        let sink = RecordingSink::default();
        let client = StatsdClient::from_sink(sink.clone(), 512, 256)
            .with_sampler(ScriptedSampler::new(&[0.05, 0.5, 0.1, 0.100_000_1]));

        for _ in 0..4 {
            client.sampling("foo.bar.counter", 0.1);
        }
        client.flush();

        // Draws at or below the rate are emitted.
        assert_eq!(sink.packet_strings(), vec!["foo.bar.counter:1|c@0.1\nfoo.bar.counter:1|c@0.1".to_string()]);
    }

    #[test]
    fn sampling_probability() {
        const CALLS: usize = 100_000;
        const RATE: f64 = 0.1;

        let sink = RecordingSink::default();
        let client = StatsdClient::from_sink(sink.clone(), 1432, 256)
            .with_sampler(Mutex::new(Xoshiro256StarStar::seed_from_u64(0x5eed)));

        for _ in 0..CALLS {
            client.sampling("hot.path", RATE);
        }
        client.flush();

        let emitted = lines(&sink);
        assert!(emitted.iter().all(|l| l == "hot.path:1|c@0.1"));

        // Binomial standard deviation is ~95 for these parameters; allow five of them.
        let expected = CALLS as f64 * RATE;
        let tolerance = 5.0 * (CALLS as f64 * RATE * (1.0 - RATE)).sqrt();
        let actual = emitted.len() as f64;
        assert!((actual - expected).abs() < tolerance, "emitted {actual}, expected {expected} +/- {tolerance}");
    }

    #[test]
    fn sampling_with_thread_rng() {
        let (client, sink) = client(1432);

        for _ in 0..1000 {
            client.sampling("always", 1.0);
        }
        client.flush();

        let emitted = lines(&sink);
        assert_eq!(emitted.len(), 1000);
        assert!(emitted.iter().all(|l| l == "always:1|c@1"));
    }

    #[test]
    fn packets_respect_packet_size() {
        let (client, sink) = client(64);

        for i in 0..100 {
            client.counting("foo.bar.counter", i);
        }
        client.flush();

        let packets = sink.packet_strings();
        assert!(packets.len() > 1);
        assert!(packets.iter().all(|p| p.len() < 64 && !p.ends_with('\n')));

        let values = lines(&sink)
            .iter()
            .map(|l| l.strip_prefix("foo.bar.counter:").unwrap().strip_suffix("|c").unwrap().parse::<i64>().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(values, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn concurrent_emission() {
        const THREADS: usize = 8;
        const CALLS: usize = 2_000;

        let (client, sink) = client(512);
        let client = Arc::new(client);

        let handles = (0..THREADS)
            .map(|t| {
                let client = Arc::clone(&client);
                thread::spawn(move || {
                    let bucket = format!("thread{t}");
                    for _ in 0..CALLS {
                        client.counting(&bucket, 1);
                    }
                })
            })
            .collect::<Vec<_>>();

        for handle in handles {
            handle.join().unwrap();
        }
        client.flush();

        let emitted = lines(&sink);
        assert_eq!(emitted.len(), THREADS * CALLS);
        for t in 0..THREADS {
            let expected = format!("thread{t}:1|c");
            assert_eq!(emitted.iter().filter(|l| **l == expected).count(), CALLS);
        }
    }

    fn wait_for_lines(sink: &RecordingSink, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if !sink.packets().is_empty() {
                return true;
            }
            sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn auto_flush_override() {
        let (client, sink) = client(512);

        client.auto_flush(Duration::from_secs(3600), false).unwrap();
        assert_eq!(client.auto_flush_period(), Some(Duration::from_secs(3600)));

        // Without override, the first flusher stays in charge.
        client.auto_flush(Duration::from_millis(10), false).unwrap();
        assert_eq!(client.auto_flush_period(), Some(Duration::from_secs(3600)));

        client.counting("foo", 1);
        sleep(Duration::from_millis(100));
        assert!(sink.packets().is_empty());

        // With override, the new period takes over.
        client.auto_flush(Duration::from_millis(10), true).unwrap();
        assert_eq!(client.auto_flush_period(), Some(Duration::from_millis(10)));
        assert!(wait_for_lines(&sink, Duration::from_secs(5)));
        assert_eq!(sink.packet_strings(), vec!["foo:1|c".to_string()]);
    }

    #[test]
    fn auto_flush_ignores_zero_period() {
        let (client, _sink) = client(512);

        client.auto_flush(Duration::ZERO, true).unwrap();
        assert_eq!(client.auto_flush_period(), None);
    }

    #[test]
    fn stop_auto_flush() {
        let (client, sink) = client(512);

        client.auto_flush(Duration::from_millis(10), false).unwrap();
        client.stop_auto_flush();
        assert_eq!(client.auto_flush_period(), None);

        sleep(Duration::from_millis(50));
        client.counting("foo", 1);
        sleep(Duration::from_millis(100));
        assert!(sink.packets().is_empty());
    }

    #[test]
    fn drop_flushes_remaining() {
        let (client, sink) = client(512);

        client.gauge("foo", 7);
        assert!(sink.packets().is_empty());

        drop(client);
        assert_eq!(sink.packet_strings(), vec!["foo:7|g".to_string()]);
    }
}
