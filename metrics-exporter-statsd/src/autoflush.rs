use std::{io, sync::Arc, thread, time::Duration};

use crossbeam_channel::{bounded, select, tick, Sender};
use tracing::debug;

use crate::{buffer::Buffer, sink::Sink};

/// A background thread that flushes a buffer on a fixed period.
///
/// Dropping the handle stops the thread. Stopping does not wait for the thread to exit, so a flush that was already
/// due may still happen shortly after the handle is gone.
pub(crate) struct AutoFlush {
    period: Duration,
    _stop: Sender<()>,
}

impl AutoFlush {
    /// Spawns the flush thread.
    pub fn spawn<S>(buffer: Arc<Buffer<S>>, period: Duration) -> io::Result<Self>
    where
        S: Sink + 'static,
    {
        let (stop_tx, stop_rx) = bounded::<()>(0);

        thread::Builder::new().name("metrics-exporter-statsd-autoflush".to_string()).spawn(move || {
            let ticker = tick(period);
            debug!(?period, "Auto-flush started.");

            loop {
                select! {
                    recv(ticker) -> _ => buffer.flush(),
                    // Nothing is ever sent on the stop channel, so this only fires once the handle is dropped.
                    recv(stop_rx) -> _ => break,
                }
            }

            debug!(?period, "Auto-flush stopped.");
        })?;

        Ok(Self { period, _stop: stop_tx })
    }

    /// Returns the flush period.
    pub fn period(&self) -> Duration {
        self.period
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::Arc,
        thread::sleep,
        time::{Duration, Instant},
    };

    use super::AutoFlush;
    use crate::{buffer::Buffer, sink::test_util::RecordingSink};

    fn wait_for_packets(sink: &RecordingSink, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if sink.packets().len() >= count {
                return true;
            }
            sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn flushes_periodically() {
        let sink = RecordingSink::default();
        let buffer = Arc::new(Buffer::new(512, 64, sink.clone()));
        let autoflush = AutoFlush::spawn(Arc::clone(&buffer), Duration::from_millis(10)).unwrap();
        assert_eq!(autoflush.period(), Duration::from_millis(10));

        buffer.write_str_once("foo:1|c\n");
        assert!(wait_for_packets(&sink, 1, Duration::from_secs(5)));

        buffer.write_str_once("bar:2|c\n");
        assert!(wait_for_packets(&sink, 2, Duration::from_secs(5)));
        assert_eq!(sink.packet_strings(), vec!["foo:1|c\n".to_string(), "bar:2|c\n".to_string()]);
    }

    #[test]
    fn stops_when_dropped() {
        let sink = RecordingSink::default();
        let buffer = Arc::new(Buffer::new(512, 64, sink.clone()));
        let autoflush = AutoFlush::spawn(Arc::clone(&buffer), Duration::from_millis(10)).unwrap();
        drop(autoflush);

        // A tick that was already due can still land right after stopping.
        sleep(Duration::from_millis(50));
        sink.clear();

        buffer.write_str_once("foo:1|c\n");
        sleep(Duration::from_millis(100));
        assert!(sink.packets().is_empty());
        assert_eq!(Arc::strong_count(&buffer), 1);
    }
}
