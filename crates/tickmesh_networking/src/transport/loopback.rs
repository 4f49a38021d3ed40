//! In-memory datagram network.
//!
//! Every endpoint gets an inbox keyed by its address. Delivery is instant
//! and ordered; loss is modelled by blocking an address, which silently
//! drops everything it sends and everything sent to it. That is enough to
//! simulate a peer crashing without telling anyone.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;

use super::Transport;

#[derive(Default)]
struct Hub {
    inboxes: HashMap<SocketAddr, VecDeque<(Vec<u8>, SocketAddr)>>,
    blocked: HashSet<SocketAddr>,
    sent: HashMap<SocketAddr, u64>,
    dropped: u64,
}

/// Shared in-memory network.
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    hub: Arc<Mutex<Hub>>,
}

impl LoopbackNetwork {
    /// Creates an empty network.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches an endpoint at `addr`, replacing any previous one.
    #[must_use]
    pub fn endpoint(&self, addr: SocketAddr) -> LoopbackTransport {
        self.hub.lock().inboxes.insert(addr, VecDeque::new());
        LoopbackTransport {
            hub: Arc::clone(&self.hub),
            addr,
        }
    }

    /// Cuts `addr` off in both directions.
    pub fn block(&self, addr: SocketAddr) {
        let mut hub = self.hub.lock();
        hub.blocked.insert(addr);
        if let Some(inbox) = hub.inboxes.get_mut(&addr) {
            let lost = inbox.len() as u64;
            inbox.clear();
            hub.dropped += lost;
        }
    }

    /// Reconnects `addr`.
    pub fn unblock(&self, addr: SocketAddr) {
        self.hub.lock().blocked.remove(&addr);
    }

    /// Datagrams successfully delivered from `addr` so far.
    #[must_use]
    pub fn sent_from(&self, addr: SocketAddr) -> u64 {
        self.hub.lock().sent.get(&addr).copied().unwrap_or(0)
    }

    /// Datagrams waiting in the inbox of `addr`.
    #[must_use]
    pub fn pending(&self, addr: SocketAddr) -> usize {
        self.hub.lock().inboxes.get(&addr).map_or(0, VecDeque::len)
    }

    /// Datagrams lost to blocking or to unknown destinations.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.hub.lock().dropped
    }
}

/// One endpoint on a [`LoopbackNetwork`].
pub struct LoopbackTransport {
    hub: Arc<Mutex<Hub>>,
    addr: SocketAddr,
}

impl Transport for LoopbackTransport {
    fn send_to(&mut self, datagram: &[u8], addr: SocketAddr) -> io::Result<usize> {
        let mut hub = self.hub.lock();
        if hub.blocked.contains(&self.addr) || hub.blocked.contains(&addr) {
            hub.dropped += 1;
            return Ok(datagram.len());
        }
        match hub.inboxes.get_mut(&addr) {
            Some(inbox) => {
                inbox.push_back((datagram.to_vec(), self.addr));
                *hub.sent.entry(self.addr).or_insert(0) += 1;
            }
            None => hub.dropped += 1,
        }
        Ok(datagram.len())
    }

    fn try_recv(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        let mut hub = self.hub.lock();
        let Some((datagram, from)) = hub.inboxes.get_mut(&self.addr).and_then(VecDeque::pop_front)
        else {
            return Ok(None);
        };
        // Oversized datagrams are truncated, as a UDP socket would.
        let len = datagram.len().min(buf.len());
        buf[..len].copy_from_slice(&datagram[..len]);
        Ok(Some((len, from)))
    }

    fn local_addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        self.hub.lock().inboxes.remove(&self.addr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(last: u8) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, last], 4507))
    }

    #[test]
    fn test_ordered_delivery() {
        let network = LoopbackNetwork::new();
        let mut a = network.endpoint(addr(1));
        let mut b = network.endpoint(addr(2));

        a.send_to(b"one", addr(2)).unwrap();
        a.send_to(b"two", addr(2)).unwrap();

        let mut buf = [0u8; 16];
        assert_eq!(b.try_recv(&mut buf).unwrap(), Some((3, addr(1))));
        assert_eq!(&buf[..3], b"one");
        assert_eq!(b.try_recv(&mut buf).unwrap(), Some((3, addr(1))));
        assert_eq!(&buf[..3], b"two");
        assert_eq!(b.try_recv(&mut buf).unwrap(), None);
        assert_eq!(network.sent_from(addr(1)), 2);
    }

    #[test]
    fn test_blocked_peer_is_silent() {
        let network = LoopbackNetwork::new();
        let mut a = network.endpoint(addr(1));
        let mut b = network.endpoint(addr(2));
        network.block(addr(2));

        a.send_to(b"lost", addr(2)).unwrap();
        b.send_to(b"lost", addr(1)).unwrap();

        assert_eq!(network.pending(addr(1)), 0);
        assert_eq!(network.pending(addr(2)), 0);
        assert_eq!(network.dropped(), 2);

        network.unblock(addr(2));
        a.send_to(b"back", addr(2)).unwrap();
        assert_eq!(network.pending(addr(2)), 1);
    }

    #[test]
    fn test_dropped_endpoint_detaches() {
        let network = LoopbackNetwork::new();
        let mut a = network.endpoint(addr(1));
        drop(network.endpoint(addr(2)));

        a.send_to(b"nobody", addr(2)).unwrap();
        assert_eq!(network.dropped(), 1);
    }
}
