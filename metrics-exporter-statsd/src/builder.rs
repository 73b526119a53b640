use std::{net::SocketAddr, time::Duration};

use thiserror::Error;
use tracing::debug;

use crate::{
    client::StatsdClient,
    format::SMALLEST_VALID_PAYLOAD,
    recorder::StatsdRecorder,
    sampling::{SampleSource, ThreadRngSampler},
    transport::{RemoteAddr, Transport},
};

/// Packet size for routing over the public Internet. This is the default.
///
/// Like the other packet sizes, this accounts for the maximum IP and UDP header sizes.
pub const PACKET_SIZE_COMMODITY_INTERNET: usize = 512;

/// Packet size for Fast Ethernet, most likely found on intranets.
pub const PACKET_SIZE_FAST_ETHERNET: usize = 1432;

/// Packet size for Gigabit Ethernet with jumbo frames.
pub const PACKET_SIZE_GIGABIT_ETHERNET: usize = 8932;

const DEFAULT_SLACK: usize = 256;
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);
const DEFAULT_RECORDER_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Errors that could occur while building or installing a StatsD client/recorder.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Failed to parse the remote address.
    #[error("invalid remote address: {reason}")]
    InvalidRemoteAddress {
        /// Details about the parsing failure.
        reason: String,
    },

    /// The packet size is too small to hold even a single metric.
    #[error("packet size {size} is too small (must be {minimum} or greater)")]
    InvalidPacketSize {
        /// The configured packet size.
        size: usize,

        /// The smallest usable packet size.
        minimum: usize,
    },

    /// Failed to create the socket, or to connect it to the remote address.
    #[error("failed to connect to remote address")]
    Connect(#[source] std::io::Error),

    /// Failed to spawn the background thread for periodic flushing.
    #[error("failed to spawn background thread for periodic flushing")]
    Backend,

    /// Failed to install the recorder due to an existing global recorder already being installed.
    #[error("failed to install exporter as global recorder")]
    FailedToInstall,
}

/// Builder for a StatsD client.
pub struct StatsdBuilder {
    remote_addr: RemoteAddr,
    packet_size: usize,
    slack: usize,
    prefix: Option<String>,
    write_timeout: Duration,
    flush_interval: Option<Duration>,
    sampler: Box<dyn SampleSource>,
}

impl StatsdBuilder {
    /// Set the remote address to send metrics to.
    ///
    /// For UDP, the address simply needs to be in the format of `<host>:<port>`. On Linux, a Unix domain socket in
    /// datagram mode can be used with an address in the format of `unixgram://<path>`.
    ///
    /// Defaults to sending to `127.0.0.1:8125` over UDP.
    ///
    /// # Errors
    ///
    /// If the given address is not able to be parsed as a valid address, an error will be returned indicating the
    /// reason.
    pub fn with_remote_address<A>(mut self, addr: A) -> Result<Self, BuildError>
    where
        A: AsRef<str>,
    {
        self.remote_addr = RemoteAddr::try_from(addr.as_ref())
            .map_err(|reason| BuildError::InvalidRemoteAddress { reason })?;
        Ok(self)
    }

    /// Set the target packet size.
    ///
    /// Metric lines are coalesced until they reach this many bytes, and then sent as a single packet. Packets never
    /// split a line, so they stay below this size unless a single line is longer than it.
    ///
    /// See [`PACKET_SIZE_FAST_ETHERNET`] and [`PACKET_SIZE_GIGABIT_ETHERNET`] for environments that can carry larger
    /// packets.
    ///
    /// Defaults to [`PACKET_SIZE_COMMODITY_INTERNET`] (512 bytes).
    #[must_use]
    pub fn with_packet_size(mut self, packet_size: usize) -> Self {
        self.packet_size = packet_size;
        self
    }

    /// Set the buffer slack.
    ///
    /// The buffer is allocated once, with room for the packet size plus the slack. The slack absorbs the line being
    /// written when a packet fills up, and should fit the longest expected line to avoid reallocating.
    ///
    /// Defaults to 256 bytes.
    #[must_use]
    pub fn with_slack(mut self, slack: usize) -> Self {
        self.slack = slack;
        self
    }

    /// Set a prefix for all bucket names.
    ///
    /// Buckets are written as `<prefix>.<bucket>`.
    ///
    /// Defaults to no prefix.
    #[must_use]
    pub fn with_prefix<P: Into<String>>(mut self, prefix: P) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Set the write timeout for sending packets.
    ///
    /// All writers wait on a packet being sent when their write fills the buffer, so this bounds how long a stalled
    /// socket can hold them up. When the timeout is reached, the packet is dropped without retrying.
    ///
    /// Defaults to 1 second.
    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set the periodic flush interval.
    ///
    /// When set, a background thread flushes buffered metrics on this interval, so that metrics don't sit in a
    /// partially-filled packet indefinitely.
    ///
    /// Defaults to no periodic flushing for [`build`][StatsdBuilder::build], and to 1 second when building a recorder.
    #[must_use]
    pub fn with_flush_interval(mut self, flush_interval: Duration) -> Self {
        self.flush_interval = Some(flush_interval);
        self
    }

    /// Set the source of random draws for sampled counters.
    ///
    /// Defaults to the thread-local random number generator.
    #[must_use]
    pub fn with_sampler<R: SampleSource + 'static>(mut self, sampler: R) -> Self {
        self.sampler = Box::new(sampler);
        self
    }

    /// Builds the client.
    ///
    /// The socket is created and connected immediately, and periodic flushing is started if a flush interval was set.
    ///
    /// # Errors
    ///
    /// If the packet size is too small, if the socket cannot be created or connected, or if the background thread for
    /// periodic flushing cannot be spawned, an error will be returned.
    pub fn build(self) -> Result<StatsdClient, BuildError> {
        let minimum = SMALLEST_VALID_PAYLOAD.len();
        if self.packet_size < minimum {
            return Err(BuildError::InvalidPacketSize { size: self.packet_size, minimum });
        }

        let transport =
            Transport::connect(&self.remote_addr, self.write_timeout).map_err(BuildError::Connect)?;

        let mut client = StatsdClient::from_sink(transport, self.packet_size, self.slack);
        client.set_sampler(self.sampler);
        if let Some(prefix) = self.prefix {
            client = client.with_prefix(prefix);
        }

        if let Some(flush_interval) = self.flush_interval {
            client.auto_flush(flush_interval, false).map_err(|_| BuildError::Backend)?;
        }

        debug!(
            transport = self.remote_addr.transport_id(),
            packet_size = self.packet_size,
            flush_interval = ?self.flush_interval,
            "Built StatsD client."
        );

        Ok(client)
    }

    /// Builds the client and wraps it in a recorder.
    ///
    /// If no flush interval was set, periodic flushing is started with a 1 second interval, so that metrics recorded
    /// through the `metrics` macros are always sent.
    ///
    /// # Errors
    ///
    /// See [`build`][StatsdBuilder::build].
    pub fn build_recorder(mut self) -> Result<StatsdRecorder, BuildError> {
        self.flush_interval.get_or_insert(DEFAULT_RECORDER_FLUSH_INTERVAL);
        self.build().map(StatsdRecorder::new)
    }

    /// Builds the recorder and installs it as the global recorder.
    ///
    /// # Errors
    ///
    /// If building the recorder fails, or if a global recorder is already installed, an error will be returned.
    pub fn install(self) -> Result<(), BuildError> {
        let recorder = self.build_recorder()?;

        metrics::set_global_recorder(recorder).map_err(|_| BuildError::FailedToInstall)
    }
}

impl Default for StatsdBuilder {
    fn default() -> Self {
        StatsdBuilder {
            remote_addr: RemoteAddr::Udp(vec![SocketAddr::from(([127, 0, 0, 1], 8125))]),
            packet_size: PACKET_SIZE_COMMODITY_INTERNET,
            slack: DEFAULT_SLACK,
            prefix: None,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            flush_interval: None,
            sampler: Box::new(ThreadRngSampler),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{net::UdpSocket, time::Duration};

    use super::{BuildError, StatsdBuilder};

    #[test]
    fn rejects_invalid_remote_address() {
        let result = StatsdBuilder::default().with_remote_address("localhost");
        assert!(matches!(result, Err(BuildError::InvalidRemoteAddress { .. })));
    }

    #[test]
    fn rejects_tiny_packet_size() {
        let result = StatsdBuilder::default().with_packet_size(3).build();
        assert!(matches!(result, Err(BuildError::InvalidPacketSize { size: 3, minimum: 6 })));
    }

    #[test]
    fn builds_connected_client() {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        server.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

        let client = StatsdBuilder::default()
            .with_remote_address(server.local_addr().unwrap().to_string())
            .unwrap()
            .with_prefix("app")
            .build()
            .unwrap();
        assert_eq!(client.auto_flush_period(), None);

        client.gauge("foo.bar.gauge", 42);
        client.counting("foo.bar.counter", 1);
        client.flush();

        let mut buf = [0u8; 512];
        let n = server.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"app.foo.bar.gauge:42|g\napp.foo.bar.counter:1|c");
    }

    #[test]
    fn starts_configured_auto_flush() {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();

        let client = StatsdBuilder::default()
            .with_remote_address(server.local_addr().unwrap().to_string())
            .unwrap()
            .with_flush_interval(Duration::from_millis(250))
            .build()
            .unwrap();
        assert_eq!(client.auto_flush_period(), Some(Duration::from_millis(250)));
    }
}
