//! A [StatsD][statsd] client that coalesces metric lines into network-sized packets, with a [`metrics`]-compatible
//! recorder on top.
//!
//! [statsd]: https://github.com/statsd/statsd/blob/master/docs/metric_types.md
//!
//! # Usage
//!
//! The client can be used directly:
//!
//! ```no_run
//! # use std::time::Duration;
//! # use metrics_exporter_statsd::StatsdBuilder;
//! let client = StatsdBuilder::default()
//!     .with_remote_address("127.0.0.1:8125")
//!     .expect("failed to parse remote address")
//!     .with_flush_interval(Duration::from_millis(500))
//!     .build()
//!     .expect("failed to build client");
//!
//! client.counting("foo.bar.counter", 1);
//! client.gauge("foo.bar.gauge", 42);
//! client.timing("foo.bar.timing", 153);
//! client.sampling("foo.bar.hot_counter", 0.1);
//! ```
//!
//! Or installed as the global recorder, so that the `metrics` macros send to the StatsD server:
//!
//! ```no_run
//! # use metrics_exporter_statsd::StatsdBuilder;
//! StatsdBuilder::default().install().expect("failed to install recorder");
//!
//! metrics::counter!("requests").increment(1);
//! ```
//!
//! # Coalescing
//!
//! StatsD lines are newline delimited, so many of them can share a single datagram. Every metric is written into a
//! [`Buffer`] as one transaction, and once the buffer reaches the configured packet size, everything written _before_
//! that transaction is sent as one packet. A line is never split across packets, and lines written concurrently from
//! different threads never interleave.
//!
//! Packets are also sent when [`StatsdClient::flush`] is called, when the client is dropped, and periodically when a
//! flush interval is configured, so that a quiet application's metrics don't sit in a half-filled packet.
//!
//! # Delivery
//!
//! Delivery is best-effort. Sending never blocks the caller on the network beyond the configured write timeout, and
//! a packet that fails to send is logged and dropped without retrying.
//!
//! # Packet sizes
//!
//! The default packet size, [`PACKET_SIZE_COMMODITY_INTERNET`], is safe for routing over the public Internet. Local
//! networks can usually carry [`PACKET_SIZE_FAST_ETHERNET`], or [`PACKET_SIZE_GIGABIT_ETHERNET`] with jumbo frames.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod autoflush;

mod buffer;
pub use self::buffer::{Buffer, Transaction};

mod builder;
pub use self::builder::{
    BuildError, StatsdBuilder, PACKET_SIZE_COMMODITY_INTERNET, PACKET_SIZE_FAST_ETHERNET,
    PACKET_SIZE_GIGABIT_ETHERNET,
};

mod client;
pub use self::client::{ClientError, StatsdClient};

mod format;

mod recorder;
pub use self::recorder::StatsdRecorder;

mod sampling;
pub use self::sampling::{SampleSource, ThreadRngSampler};

mod sink;
pub use self::sink::Sink;

mod transport;
pub use self::transport::Transport;
