//! # Transport Layer
//!
//! One non-blocking datagram socket per peer, plus the bounded wait.
//!
//! ## Design
//!
//! - Raw UDP, no reliability layer: the session tolerates loss
//! - Sockets never block; "waiting" is poll, sleep, poll until the budget runs out
//! - [`Transport`] is the seam for the in-memory [`LoopbackNetwork`] used by tests

mod loopback;

pub use loopback::{LoopbackNetwork, LoopbackTransport};

use std::io;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use crate::clock::Clock;
use crate::error::{SessionError, SessionResult};
use crate::protocol::{decode, Message, MessageSerializer};
use crate::MAX_MESSAGE_SIZE;

/// A datagram endpoint.
pub trait Transport {
    /// Sends one datagram.
    fn send_to(&mut self, datagram: &[u8], addr: SocketAddr) -> io::Result<usize>;

    /// Receives one datagram into `buf` without blocking.
    ///
    /// `Ok(None)` means nothing is pending.
    fn try_recv(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>>;

    /// Address this endpoint is bound to.
    fn local_addr(&self) -> SocketAddr;

    /// Returns true if `addr` reaches this very endpoint.
    fn is_local(&self, addr: SocketAddr) -> bool {
        addr == self.local_addr()
    }

    /// Resolves a host name, `ip`, `ip:port` or `name:port`.
    fn resolve(&self, host: &str, default_port: u16) -> Option<SocketAddr> {
        resolve_host(host, default_port)
    }
}

/// Resolves a host the way the session addresses peers.
///
/// Bare hosts get `default_port`. IPv4 results are preferred.
#[must_use]
pub fn resolve_host(host: &str, default_port: u16) -> Option<SocketAddr> {
    let host = host.trim();
    if host.is_empty() {
        return None;
    }
    if let Ok(addr) = host.parse::<SocketAddr>() {
        return Some(addr);
    }
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Some(SocketAddr::new(ip, default_port));
    }

    let resolved: Vec<SocketAddr> = match host.rsplit_once(':') {
        Some((name, port)) if port.parse::<u16>().is_ok() => {
            (name, port.parse::<u16>().ok()?).to_socket_addrs().ok()?.collect()
        }
        _ => (host, default_port).to_socket_addrs().ok()?.collect(),
    };
    resolved
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| resolved.first())
        .copied()
}

/// Outcome of one receive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// A well-formed message arrived.
    Message {
        /// The decoded message.
        message: Message,
        /// Sender address.
        from: SocketAddr,
    },
    /// The wait budget elapsed with nothing received.
    TimeOut,
}

/// Transport statistics.
#[derive(Clone, Copy, Debug, Default)]
pub struct TransportStats {
    /// Messages sent.
    pub messages_sent: u64,
    /// Messages received and decoded.
    pub messages_received: u64,
    /// Bytes sent.
    pub bytes_sent: u64,
    /// Bytes received.
    pub bytes_received: u64,
    /// Datagrams that failed to decode.
    pub decode_errors: u64,
    /// Receive waits that expired.
    pub timeouts: u64,
}

/// Message-level wrapper around a [`Transport`].
///
/// Owns the encode and receive buffers so the tick loop never allocates
/// for framing.
pub struct MessageChannel<T> {
    transport: T,
    serializer: MessageSerializer,
    recv_buffer: [u8; MAX_MESSAGE_SIZE],
    stats: TransportStats,
}

impl<T: Transport> MessageChannel<T> {
    /// Wraps a transport.
    #[must_use]
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            serializer: MessageSerializer::new(),
            recv_buffer: [0u8; MAX_MESSAGE_SIZE],
            stats: TransportStats::default(),
        }
    }

    /// Encodes and sends one message.
    pub fn send(&mut self, message: &Message, addr: SocketAddr) -> SessionResult<()> {
        let datagram = self.serializer.serialize(message)?;
        let len = datagram.len();
        self.transport
            .send_to(datagram, addr)
            .map_err(|source| SessionError::Send { addr, source })?;

        self.stats.messages_sent += 1;
        self.stats.bytes_sent += len as u64;
        tracing::trace!(?addr, len, kind = ?message.message_type(), "sent");
        Ok(())
    }

    /// Receives the next well-formed message.
    ///
    /// With `wait` unset this is a single non-blocking check. Otherwise the
    /// socket is polled every `retry` until `budget` is spent, then
    /// [`Delivery::TimeOut`] is returned. Malformed datagrams are skipped.
    pub fn receive<C: Clock>(
        &mut self,
        clock: &C,
        budget: Duration,
        retry: Duration,
        wait: bool,
    ) -> SessionResult<Delivery> {
        let mut waited = Duration::ZERO;
        loop {
            match self.transport.try_recv(&mut self.recv_buffer) {
                Ok(Some((len, from))) => match decode(&self.recv_buffer[..len]) {
                    Ok(message) => {
                        self.stats.messages_received += 1;
                        self.stats.bytes_received += len as u64;
                        return Ok(Delivery::Message { message, from });
                    }
                    Err(err) => {
                        self.stats.decode_errors += 1;
                        tracing::warn!("Dropping malformed datagram from {}: {}", from, err);
                    }
                },
                Ok(None) => {
                    if !wait || waited >= budget {
                        self.stats.timeouts += 1;
                        return Ok(Delivery::TimeOut);
                    }
                    clock.sleep(retry);
                    waited += retry;
                }
                Err(err) => return Err(SessionError::Receive(err)),
            }
        }
    }

    /// Returns the wrapped transport.
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Returns statistics.
    #[must_use]
    pub const fn stats(&self) -> &TransportStats {
        &self.stats
    }
}

/// UDP socket wrapper.
///
/// Thin wrapper around the std socket in non-blocking mode.
pub struct UdpTransport {
    /// The underlying socket.
    socket: UdpSocket,
    /// Local address.
    local_addr: SocketAddr,
    /// Interface addresses that reach the socket when it is bound to a wildcard.
    host_ips: Vec<IpAddr>,
}

impl UdpTransport {
    /// Creates a non-blocking transport bound to `addr`.
    pub fn bind(addr: SocketAddr) -> SessionResult<Self> {
        let bind_err = |source| SessionError::Bind { addr, source };

        let socket = UdpSocket::bind(addr).map_err(bind_err)?;
        socket.set_nonblocking(true).map_err(bind_err)?;
        let local_addr = socket.local_addr().map_err(bind_err)?;
        let host_ips = if local_addr.ip().is_unspecified() {
            interface_addresses()
        } else {
            Vec::new()
        };

        Ok(Self { socket, local_addr, host_ips })
    }
}

/// Every address assigned to this machine's interfaces.
fn interface_addresses() -> Vec<IpAddr> {
    match local_ip_address::list_afinet_netifas() {
        Ok(interfaces) => interfaces.into_iter().map(|(_, ip)| ip).collect(),
        Err(err) => {
            tracing::warn!("Cannot list network interfaces: {}", err);
            Vec::new()
        }
    }
}

impl Transport for UdpTransport {
    fn send_to(&mut self, datagram: &[u8], addr: SocketAddr) -> io::Result<usize> {
        self.socket.send_to(datagram, addr)
    }

    fn try_recv(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        loop {
            match self.socket.recv_from(buf) {
                Ok((len, addr)) => return Ok(Some((len, addr))),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                // ICMP "port unreachable" from an earlier send; the peer is
                // gone, which the timeout counters already handle.
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionRefused
                    ) =>
                {
                    continue
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn is_local(&self, addr: SocketAddr) -> bool {
        let ip = addr.ip();
        addr.port() == self.local_addr.port()
            && (ip.is_loopback()
                || ip.is_unspecified()
                || ip == self.local_addr.ip()
                || self.host_ips.contains(&ip))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::protocol::{PeerIndex, SlaveInfo, SlavePayload};

    fn slave_info() -> Message {
        Message::SlaveInfo(SlaveInfo {
            player_index: PeerIndex::new(1).unwrap(),
            resync_request: false,
            payload: SlavePayload::from_slice(b"hp=90").unwrap(),
        })
    }

    #[test]
    fn test_resolve_forms() {
        assert_eq!(resolve_host("10.1.2.3", 4507), Some("10.1.2.3:4507".parse().unwrap()));
        assert_eq!(resolve_host("10.1.2.3:99", 4507), Some("10.1.2.3:99".parse().unwrap()));
        assert_eq!(resolve_host("localhost:99", 4507).map(|a| a.port()), Some(99));
        assert_eq!(resolve_host("", 4507), None);
    }

    #[test]
    fn test_wait_expires_into_timeout() {
        let network = LoopbackNetwork::new();
        let mut channel = MessageChannel::new(network.endpoint("10.0.0.1:4507".parse().unwrap()));
        let clock = ManualClock::new();

        let delivery = channel
            .receive(&clock, Duration::from_millis(1000), Duration::from_millis(10), true)
            .unwrap();

        assert_eq!(delivery, Delivery::TimeOut);
        assert_eq!(clock.elapsed(), Duration::from_millis(1000));
        assert_eq!(channel.stats().timeouts, 1);
    }

    #[test]
    fn test_no_wait_polls_once() {
        let network = LoopbackNetwork::new();
        let mut channel = MessageChannel::new(network.endpoint("10.0.0.1:4507".parse().unwrap()));
        let clock = ManualClock::new();

        let delivery = channel
            .receive(&clock, Duration::from_millis(1000), Duration::from_millis(10), false)
            .unwrap();

        assert_eq!(delivery, Delivery::TimeOut);
        assert_eq!(clock.sleep_count(), 0);
    }

    #[test]
    fn test_send_and_receive() {
        let network = LoopbackNetwork::new();
        let a_addr: SocketAddr = "10.0.0.1:4507".parse().unwrap();
        let b_addr: SocketAddr = "10.0.0.2:4507".parse().unwrap();
        let mut a = MessageChannel::new(network.endpoint(a_addr));
        let mut b = MessageChannel::new(network.endpoint(b_addr));

        a.send(&slave_info(), b_addr).unwrap();

        let delivery = b
            .receive(&ManualClock::new(), Duration::from_millis(50), Duration::from_millis(10), true)
            .unwrap();
        assert_eq!(delivery, Delivery::Message { message: slave_info(), from: a_addr });
        assert_eq!(a.stats().messages_sent, 1);
        assert_eq!(b.stats().messages_received, 1);
    }

    #[test]
    fn test_malformed_datagrams_are_skipped() {
        let network = LoopbackNetwork::new();
        let a_addr: SocketAddr = "10.0.0.1:4507".parse().unwrap();
        let b_addr: SocketAddr = "10.0.0.2:4507".parse().unwrap();
        let mut raw = network.endpoint(a_addr);
        let mut b = MessageChannel::new(network.endpoint(b_addr));

        raw.send_to(b"garbage", b_addr).unwrap();
        let mut a = MessageChannel::new(raw);
        a.send(&slave_info(), b_addr).unwrap();

        let delivery = b
            .receive(&ManualClock::new(), Duration::from_millis(50), Duration::from_millis(10), true)
            .unwrap();
        assert!(matches!(delivery, Delivery::Message { .. }));
        assert_eq!(b.stats().decode_errors, 1);
    }

    #[test]
    fn test_udp_bind_and_local_detection() {
        let transport = UdpTransport::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let port = transport.local_addr().port();

        assert!(transport.is_local(SocketAddr::new("127.0.0.1".parse().unwrap(), port)));
        assert!(transport.is_local(SocketAddr::new("0.0.0.0".parse().unwrap(), port)));
        assert!(!transport.is_local(SocketAddr::new("127.0.0.1".parse().unwrap(), port.wrapping_add(1))));
    }

    #[test]
    fn test_wildcard_bind_knows_interface_addresses() {
        let mut transport = UdpTransport::bind("0.0.0.0:0".parse().unwrap()).unwrap();
        let port = transport.local_addr().port();
        if let Ok(interfaces) = local_ip_address::list_afinet_netifas() {
            for (_, ip) in interfaces {
                assert!(transport.is_local(SocketAddr::new(ip, port)), "{ip} not local");
            }
        }

        // eth0 at 192.0.2.2, independent of the test machine.
        transport.host_ips = vec!["192.0.2.2".parse().unwrap()];
        assert!(transport.is_local(SocketAddr::new("192.0.2.2".parse().unwrap(), port)));
        assert!(!transport.is_local(SocketAddr::new("192.0.2.3".parse().unwrap(), port)));
        assert!(!transport.is_local(SocketAddr::new("192.0.2.2".parse().unwrap(), port.wrapping_add(1))));
    }

    #[test]
    fn test_specific_bind_ignores_other_interfaces() {
        let transport = UdpTransport::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        assert!(transport.host_ips.is_empty());
    }

    #[test]
    fn test_udp_round_trip() {
        let mut a = MessageChannel::new(UdpTransport::bind("127.0.0.1:0".parse().unwrap()).unwrap());
        let mut b = MessageChannel::new(UdpTransport::bind("127.0.0.1:0".parse().unwrap()).unwrap());
        let b_addr = b.transport().local_addr();

        a.send(&slave_info(), b_addr).unwrap();

        let clock = crate::clock::SystemClock;
        let delivery = b
            .receive(&clock, Duration::from_millis(500), Duration::from_millis(1), true)
            .unwrap();
        match delivery {
            Delivery::Message { message, from } => {
                assert_eq!(message, slave_info());
                assert_eq!(from, a.transport().local_addr());
            }
            Delivery::TimeOut => panic!("Expected a message over loopback UDP"),
        }
    }
}
