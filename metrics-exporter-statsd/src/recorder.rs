use std::sync::Arc;

use metrics::{
    Counter, CounterFn, Gauge, GaugeFn, Histogram, HistogramFn, Key, KeyName, Metadata, Recorder,
    SharedString, Unit,
};
use metrics_util::registry::{Registry, Storage};
use tracing::debug;

use crate::{
    buffer::Buffer,
    client::StatsdClient,
    format::{self, MetricType},
    sink::Sink,
    transport::Transport,
};

/// A metric handle that writes every update straight into the buffer as its own line.
pub(crate) struct LineHandle<S: Sink + 'static> {
    buffer: Arc<Buffer<S>>,
    bucket: String,
}

impl<S: Sink + 'static> LineHandle<S> {
    /// Returns `false`, after logging, if `value` can't be represented in the line protocol.
    fn is_representable(&self, value: f64) -> bool {
        if value.is_finite() {
            return true;
        }

        debug!(bucket = %self.bucket, value, "Dropping non-finite metric value.");
        false
    }

    fn write_float(&self, value: f64, metric_type: MetricType) {
        if !self.is_representable(value) {
            return;
        }

        let mut tx = self.buffer.begin();
        format::write_float_line(&mut tx, None, &self.bucket, value, metric_type);
        tx.end();
    }

    fn write_gauge_delta(&self, delta: f64) {
        if !self.is_representable(delta) {
            return;
        }

        let mut tx = self.buffer.begin();
        format::write_header(&mut tx, None, &self.bucket);
        if delta.is_sign_positive() {
            tx.append_byte(b'+');
        }
        tx.append_float(delta);
        format::write_trailer(&mut tx, MetricType::Gauge);
        tx.end();
    }
}

impl<S: Sink + 'static> CounterFn for LineHandle<S> {
    fn increment(&self, value: u64) {
        let mut tx = self.buffer.begin();
        format::write_int_line(&mut tx, None, &self.bucket, value, MetricType::Counter);
        tx.end();
    }

    fn absolute(&self, value: u64) {
        // StatsD counters only carry deltas, so absolute values go out as gauges.
        let mut tx = self.buffer.begin();
        format::write_int_line(&mut tx, None, &self.bucket, value, MetricType::Gauge);
        tx.end();
    }
}

impl<S: Sink + 'static> GaugeFn for LineHandle<S> {
    fn increment(&self, value: f64) {
        self.write_gauge_delta(value);
    }

    fn decrement(&self, value: f64) {
        self.write_gauge_delta(-value);
    }

    fn set(&self, value: f64) {
        if !self.is_representable(value) {
            return;
        }

        if value == 0.0 {
            // `-0` would be read as a delta.
            self.write_float(0.0, MetricType::Gauge);
        } else if value.is_sign_negative() {
            // A leading sign marks a delta, so a negative value has to be reached from zero. Both lines go out in the
            // same transaction, and so in the same packet.
            let mut tx = self.buffer.begin();
            format::write_int_line(&mut tx, None, &self.bucket, 0u8, MetricType::Gauge);
            format::write_float_line(&mut tx, None, &self.bucket, value, MetricType::Gauge);
            tx.end();
        } else {
            self.write_float(value, MetricType::Gauge);
        }
    }
}

impl<S: Sink + 'static> HistogramFn for LineHandle<S> {
    fn record(&self, value: f64) {
        self.write_float(value, MetricType::Timing);
    }
}

/// Registry storage that hands out [`LineHandle`]s bound to a shared buffer.
pub(crate) struct LineStorage<S: Sink + 'static> {
    buffer: Arc<Buffer<S>>,
    prefix: Option<String>,
}

impl<S: Sink + 'static> LineStorage<S> {
    fn handle(&self, key: &Key) -> Arc<LineHandle<S>> {
        let bucket = match &self.prefix {
            Some(prefix) => format!("{prefix}.{}", key.name()),
            None => key.name().to_string(),
        };

        Arc::new(LineHandle { buffer: Arc::clone(&self.buffer), bucket })
    }
}

impl<S: Sink + 'static> Storage<Key> for LineStorage<S> {
    type Counter = Arc<LineHandle<S>>;
    type Gauge = Arc<LineHandle<S>>;
    type Histogram = Arc<LineHandle<S>>;

    fn counter(&self, key: &Key) -> Self::Counter {
        self.handle(key)
    }

    fn gauge(&self, key: &Key) -> Self::Gauge {
        self.handle(key)
    }

    fn histogram(&self, key: &Key) -> Self::Histogram {
        self.handle(key)
    }
}

/// A recorder that sends metrics to a StatsD server.
///
/// Every update is written as its own line, with no client-side aggregation: counters are sent as `|c`, gauges as
/// `|g`, and histograms as timings (`|ms`). Lines are coalesced into packets by the underlying [`StatsdClient`], which
/// the recorder owns along with its periodic flusher.
///
/// Labels are not part of the StatsD line format and are not sent.
pub struct StatsdRecorder<S: Sink + 'static = Transport> {
    client: StatsdClient<S>,
    registry: Registry<Key, LineStorage<S>>,
}

impl<S: Sink + 'static> StatsdRecorder<S> {
    /// Creates a recorder that writes through `client`.
    pub fn new(client: StatsdClient<S>) -> Self {
        let storage =
            LineStorage { buffer: Arc::clone(client.buffer()), prefix: client.prefix().map(str::to_string) };

        StatsdRecorder { registry: Registry::new(storage), client }
    }

    /// Returns the underlying client.
    pub fn client(&self) -> &StatsdClient<S> {
        &self.client
    }
}

impl<S: Sink + 'static> Recorder for StatsdRecorder<S> {
    fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
    fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
    fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

    fn register_counter(&self, key: &Key, _: &Metadata<'_>) -> Counter {
        self.registry.get_or_create_counter(key, |existing| Counter::from_arc(Arc::clone(existing)))
    }

    fn register_gauge(&self, key: &Key, _: &Metadata<'_>) -> Gauge {
        self.registry.get_or_create_gauge(key, |existing| Gauge::from_arc(Arc::clone(existing)))
    }

    fn register_histogram(&self, key: &Key, _: &Metadata<'_>) -> Histogram {
        self.registry
            .get_or_create_histogram(key, |existing| Histogram::from_arc(Arc::clone(existing)))
    }
}
