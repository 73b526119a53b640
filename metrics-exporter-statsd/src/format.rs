use std::io::Write as _;

use crate::buffer::Transaction;
use crate::sink::Sink;

/// The smallest line that still carries a metric: a one-character bucket, a one-digit value, and a type.
pub(crate) const SMALLEST_VALID_PAYLOAD: &[u8] = b"a:0|c\n";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum MetricType {
    Counter,
    Gauge,
    Timing,
}

impl MetricType {
    pub(crate) fn as_bytes(self) -> &'static [u8] {
        match self {
            MetricType::Counter => b"|c",
            MetricType::Gauge => b"|g",
            MetricType::Timing => b"|ms",
        }
    }
}

/// Appends the integer `value` to `buf` in decimal.
pub(crate) fn write_int<I: itoa::Integer>(buf: &mut Vec<u8>, value: I) {
    let mut int_writer = itoa::Buffer::new();
    buf.extend_from_slice(int_writer.format(value).as_bytes());
}

/// Appends `value` to `buf` in fixed-point notation, using the fewest digits that round-trip.
///
/// Whole numbers carry no fractional part, so `1.0` is written as `1` and `0.25` as `0.25`. Non-finite values are
/// written as `NaN`, `inf` and `-inf`.
pub(crate) fn write_float(buf: &mut Vec<u8>, value: f64) {
    let mut float_writer = ryu::Buffer::new();
    let formatted = float_writer.format(value);

    if !value.is_finite() {
        buf.extend_from_slice(formatted.as_bytes());
        return;
    }

    // `ryu` switches to scientific notation for very large and very small magnitudes, which the line protocol can't
    // carry. `Display` for `f64` is also shortest-round-trip but never uses an exponent.
    if formatted.contains('e') {
        write!(buf, "{value}").expect("should not fail to write float into buffer");
        return;
    }

    let formatted = formatted.strip_suffix(".0").unwrap_or(formatted);
    buf.extend_from_slice(formatted.as_bytes());
}

/// Writes the bucket header, `prefix.bucket:`, including the value separator.
pub(crate) fn write_header<S: Sink>(tx: &mut Transaction<'_, S>, prefix: Option<&str>, bucket: &str) {
    if let Some(prefix) = prefix {
        tx.append_str(prefix);
        tx.append_byte(b'.');
    }

    tx.append_str(bucket);
    tx.append_byte(b':');
}

/// Writes the type suffix and the record separator.
pub(crate) fn write_trailer<S: Sink>(tx: &mut Transaction<'_, S>, metric_type: MetricType) {
    tx.append(metric_type.as_bytes());
    tx.append_byte(b'\n');
}

/// Writes a complete `bucket:value|type` line with an integer value.
pub(crate) fn write_int_line<S, I>(
    tx: &mut Transaction<'_, S>,
    prefix: Option<&str>,
    bucket: &str,
    value: I,
    metric_type: MetricType,
) where
    S: Sink,
    I: itoa::Integer,
{
    write_header(tx, prefix, bucket);
    tx.append_int(value);
    write_trailer(tx, metric_type);
}

/// Writes a complete `bucket:value|type` line with a floating-point value.
pub(crate) fn write_float_line<S: Sink>(
    tx: &mut Transaction<'_, S>,
    prefix: Option<&str>,
    bucket: &str,
    value: f64,
    metric_type: MetricType,
) {
    write_header(tx, prefix, bucket);
    tx.append_float(value);
    write_trailer(tx, metric_type);
}

/// Writes a sampled counter line, `bucket:1|c@rate`.
pub(crate) fn write_sampled_line<S: Sink>(
    tx: &mut Transaction<'_, S>,
    prefix: Option<&str>,
    bucket: &str,
    rate: f64,
) {
    write_header(tx, prefix, bucket);
    tx.append_byte(b'1');
    tx.append(MetricType::Counter.as_bytes());
    tx.append_byte(b'@');
    tx.append_float(rate);
    tx.append_byte(b'\n');
}
