use parking_lot::{Mutex, MutexGuard};
use tracing::{error, trace};

use crate::{format, sink::Sink};

struct Inner<S> {
    content: Vec<u8>,
    sink: S,
}

impl<S: Sink> Inner<S> {
    /// Sends the first `len` bytes to the sink and shifts the remaining bytes to the front.
    ///
    /// `len` must not exceed the current content length. An empty buffer is never flushed.
    fn flush(&mut self, len: usize, trim_trailing_byte: bool) {
        let total = self.content.len();
        if total == 0 || len == 0 {
            return;
        }

        let payload = if trim_trailing_byte { &self.content[..len - 1] } else { &self.content[..len] };
        if !payload.is_empty() {
            match self.sink.send(payload) {
                Ok(_) => trace!(payload_len = payload.len(), "Flushed payload."),
                Err(e) => error!(error = %e, payload_len = payload.len(), "Failed to send payload."),
            }
        }

        // The payload is gone whether or not the send succeeded.
        self.content.copy_within(len.., 0);
        self.content.truncate(total - len);
    }
}

/// A coalescing byte buffer with transactional writes.
///
/// Metric lines are small, and sending each one in its own packet wastes both system calls and network overhead. A
/// `Buffer` accumulates lines until they reach a target packet size (the capacity), and then hands everything written
/// so far to its [`Sink`] as a single packet.
///
/// Writes happen inside a [`Transaction`], which holds the buffer's lock for its entire lifetime. When a transaction
/// ends and the buffer has reached capacity, only the bytes that existed _before_ the transaction began are flushed,
/// so a single line is never split across two packets. The buffer may therefore exceed its capacity by up to one
/// transaction; the slack given at construction reserves room for exactly that, so the backing storage is allocated
/// once and never grows in steady state.
pub struct Buffer<S> {
    capacity: usize,
    trim_trailing_byte: bool,
    inner: Mutex<Inner<S>>,
}

impl<S: Sink> Buffer<S> {
    /// Creates a new `Buffer` that flushes to `sink` once `capacity` bytes have been written.
    ///
    /// `slack` should fit the largest single transaction: the backing storage is sized to `capacity + slack`.
    pub fn new(capacity: usize, slack: usize, sink: S) -> Self {
        Self {
            capacity,
            trim_trailing_byte: false,
            inner: Mutex::new(Inner { content: Vec::with_capacity(capacity + slack), sink }),
        }
    }

    /// Sets whether or not to drop the final byte of every flushed packet.
    ///
    /// When every write ends in a record separator, such as a newline, this sends a batch of records without a
    /// dangling separator at the end.
    ///
    /// Defaults to `false`.
    #[must_use]
    pub fn with_trailing_byte_trimmed(mut self, trim: bool) -> Self {
        self.trim_trailing_byte = trim;
        self
    }

    /// Returns the capacity, in bytes, at which the buffer flushes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of bytes currently buffered.
    ///
    /// This briefly acquires the buffer lock, and so waits for any open transaction to end.
    pub fn len(&self) -> usize {
        self.inner.lock().content.len()
    }

    /// Returns `true` if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if the buffered bytes have reached the capacity.
    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    /// Begins a transaction.
    ///
    /// Blocks until any transaction open on another thread has ended. Everything appended through the returned
    /// [`Transaction`] is flushed together, in the same packet.
    pub fn begin(&self) -> Transaction<'_, S> {
        let guard = self.inner.lock();
        let safe_mark = guard.content.len();
        Transaction { guard, safe_mark, capacity: self.capacity, trim_trailing_byte: self.trim_trailing_byte }
    }

    /// Writes `bytes` as a complete transaction.
    pub fn write_once(&self, bytes: &[u8]) {
        self.begin().append(bytes);
    }

    /// Writes `s` as a complete transaction.
    pub fn write_str_once(&self, s: &str) {
        self.write_once(s.as_bytes());
    }

    /// Flushes everything currently buffered, regardless of capacity.
    ///
    /// Flushing an empty buffer does nothing.
    pub fn flush(&self) {
        let mut inner = self.inner.lock();
        let len = inner.content.len();
        inner.flush(len, self.trim_trailing_byte);
    }
}

/// An open transaction on a [`Buffer`].
///
/// The buffer stays locked until the transaction ends, either explicitly through [`end`][Transaction::end] or by
/// being dropped.
pub struct Transaction<'a, S: Sink> {
    guard: MutexGuard<'a, Inner<S>>,
    safe_mark: usize,
    capacity: usize,
    trim_trailing_byte: bool,
}

impl<'a, S: Sink> Transaction<'a, S> {
    /// Appends raw bytes.
    pub fn append(&mut self, bytes: &[u8]) {
        self.guard.content.extend_from_slice(bytes);
    }

    /// Appends a string.
    pub fn append_str(&mut self, s: &str) {
        self.append(s.as_bytes());
    }

    /// Appends a single byte.
    pub fn append_byte(&mut self, b: u8) {
        self.guard.content.push(b);
    }

    /// Appends an integer in decimal, without allocating.
    pub fn append_int<I: itoa::Integer>(&mut self, value: I) {
        format::write_int(&mut self.guard.content, value);
    }

    /// Appends a float in fixed-point notation, using the fewest digits that round-trip, without allocating.
    pub fn append_float(&mut self, value: f64) {
        format::write_float(&mut self.guard.content, value);
    }

    /// Ends the transaction, releasing the buffer.
    ///
    /// If the buffer has reached capacity, everything written before this transaction began is flushed. A transaction
    /// dropped while its thread is panicking is discarded instead.
    pub fn end(self) {}
}

impl<'a, S: Sink> Drop for Transaction<'a, S> {
    fn drop(&mut self) {
        // A transaction abandoned by a panic is rolled back, so its partial line can't prefix the next one.
        if std::thread::panicking() {
            let safe_mark = self.safe_mark;
            self.guard.content.truncate(safe_mark);
            return;
        }

        let len = self.guard.content.len();
        if len < self.capacity {
            return;
        }

        // With nothing buffered ahead of us, this transaction filled the packet by itself and goes out alone.
        let flush_len = if self.safe_mark == 0 { len } else { self.safe_mark };
        self.guard.flush(flush_len, self.trim_trailing_byte);
    }
}
