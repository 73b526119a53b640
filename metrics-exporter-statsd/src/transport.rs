use std::{
    io,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs as _, UdpSocket},
    time::Duration,
};

#[cfg(target_os = "linux")]
use std::{os::unix::net::UnixDatagram, path::PathBuf};

use crate::sink::Sink;

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum RemoteAddr {
    Udp(Vec<SocketAddr>),

    #[cfg(target_os = "linux")]
    Unixgram(PathBuf),
}

impl RemoteAddr {
    /// Returns the transport ID for the remote address, such as `udp` for UDP.
    pub const fn transport_id(&self) -> &'static str {
        match self {
            RemoteAddr::Udp(_) => "udp",
            #[cfg(target_os = "linux")]
            RemoteAddr::Unixgram(_) => "uds",
        }
    }
}

impl<'a> TryFrom<&'a str> for RemoteAddr {
    type Error = String;

    fn try_from(addr: &'a str) -> Result<Self, Self::Error> {
        #[cfg(target_os = "linux")]
        if let Some((scheme, path)) = addr.split_once("://") {
            return match scheme {
                "unixgram" => Ok(RemoteAddr::Unixgram(PathBuf::from(path))),
                _ => Err(format!("invalid scheme '{scheme}' (expected 'unixgram')")),
            };
        }

        match addr.to_socket_addrs() {
            Ok(addrs) => {
                let addrs = addrs.collect::<Vec<_>>();
                if addrs.is_empty() {
                    Err(format!("'{addr}' did not resolve to any address"))
                } else {
                    Ok(RemoteAddr::Udp(addrs))
                }
            }
            Err(e) => Err(e.to_string()),
        }
    }
}

/// A connected datagram socket.
pub enum Transport {
    /// UDP socket.
    Udp(UdpSocket),

    /// Unix domain socket in datagram (`SOCK_DGRAM`) mode.
    #[cfg(target_os = "linux")]
    Unixgram(UnixDatagram),
}

impl Transport {
    /// Connects to the given remote address, applying `write_timeout` to every send.
    pub(crate) fn connect(remote_addr: &RemoteAddr, write_timeout: Duration) -> io::Result<Self> {
        match remote_addr {
            RemoteAddr::Udp(addrs) => {
                // Bind to the same address family as the destination, or the connect will fail.
                let local: SocketAddr = match addrs.first() {
                    Some(SocketAddr::V6(_)) => (Ipv6Addr::UNSPECIFIED, 0).into(),
                    _ => (Ipv4Addr::UNSPECIFIED, 0).into(),
                };

                UdpSocket::bind(local).and_then(|socket| {
                    socket.connect(&addrs[..])?;
                    socket.set_write_timeout(Some(write_timeout))?;
                    Ok(Transport::Udp(socket))
                })
            }

            #[cfg(target_os = "linux")]
            RemoteAddr::Unixgram(path) => UnixDatagram::unbound().and_then(|socket| {
                socket.connect(path)?;
                socket.set_write_timeout(Some(write_timeout))?;
                Ok(Transport::Unixgram(socket))
            }),
        }
    }
}

impl Sink for Transport {
    fn send(&self, payload: &[u8]) -> io::Result<usize> {
        match self {
            Transport::Udp(socket) => socket.send(payload),

            #[cfg(target_os = "linux")]
            Transport::Unixgram(socket) => socket.send(payload),
        }
    }
}
