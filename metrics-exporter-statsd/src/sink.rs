use std::{
    io::{self, Write as _},
    net::UdpSocket,
    sync::Arc,
};

#[cfg(unix)]
use std::os::unix::net::UnixDatagram;

use parking_lot::Mutex;

/// A write-only destination for flushed packets.
///
/// Each call to [`send`][Sink::send] carries one complete packet: one or more whole metric lines. Implementations are
/// expected to hand the packet off without blocking indefinitely, but they are free to fail; the buffer logs and
/// discards failed packets rather than retrying them.
pub trait Sink: Send {
    /// Sends a single packet, returning the number of bytes written.
    ///
    /// # Errors
    ///
    /// If the packet could not be written, an error is returned. The packet is dropped either way.
    fn send(&self, payload: &[u8]) -> io::Result<usize>;
}

/// Sends packets as datagrams to the address the socket is connected to.
impl Sink for UdpSocket {
    fn send(&self, payload: &[u8]) -> io::Result<usize> {
        UdpSocket::send(self, payload)
    }
}

/// Sends packets as datagrams to the path the socket is connected to.
#[cfg(unix)]
impl Sink for UnixDatagram {
    fn send(&self, payload: &[u8]) -> io::Result<usize> {
        UnixDatagram::send(self, payload)
    }
}

/// Shares a sink that the caller keeps a handle to.
impl<T> Sink for Arc<T>
where
    T: Sink + Sync,
{
    fn send(&self, payload: &[u8]) -> io::Result<usize> {
        T::send(self, payload)
    }
}

/// Writes each packet in full to an arbitrary writer.
impl<W> Sink for Mutex<W>
where
    W: io::Write + Send,
{
    fn send(&self, payload: &[u8]) -> io::Result<usize> {
        self.lock().write_all(payload)?;
        Ok(payload.len())
    }
}
