//! Datagram socket abstraction
//!
//! The transport only needs non-blocking send/receive of whole datagrams.
//! [`UdpSocket`] is the real thing; [`MemoryNetwork`] connects any number of
//! [`MemorySocket`]s in-process for tests and simulation.

use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{NetworkError, Result};

/// Non-blocking datagram endpoint
pub trait DatagramSocket {
    /// Receive one datagram; `Ok(None)` when nothing is pending
    fn recv_from(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddrV4)>>;

    /// Send one datagram
    fn send_to(&self, buf: &[u8], addr: SocketAddrV4) -> Result<usize>;

    fn local_addr(&self) -> Result<SocketAddrV4>;

    /// Address used when a packet is sent to "anyone"
    fn broadcast_addr(&self) -> Ipv4Addr {
        Ipv4Addr::BROADCAST
    }
}

/// UDP socket configured for VBAN: address reuse, broadcast, non-blocking
pub struct UdpSocket {
    inner: std::net::UdpSocket,
    broadcast: Ipv4Addr,
}

impl UdpSocket {
    /// Bind to `addr`
    pub fn bind(addr: SocketAddrV4) -> Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

        socket.set_reuse_address(true)?;
        socket.set_broadcast(true)?;
        socket.set_nonblocking(true)?;
        socket
            .bind(&SocketAddr::V4(addr).into())
            .map_err(|e| NetworkError::BindFailed(format!("{}: {}", addr, e)))?;

        tracing::info!("UDP socket bound to {}", addr);

        Ok(Self {
            inner: socket.into(),
            broadcast: Ipv4Addr::BROADCAST,
        })
    }

    /// Use a directed broadcast address (e.g. 192.168.1.255) instead of 255.255.255.255
    pub fn with_broadcast(mut self, broadcast: Ipv4Addr) -> Self {
        self.broadcast = broadcast;
        self
    }
}

impl DatagramSocket for UdpSocket {
    fn recv_from(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddrV4)>> {
        match self.inner.recv_from(buf) {
            Ok((len, SocketAddr::V4(from))) => Ok(Some((len, from))),
            Ok((_, from)) => Err(NetworkError::NotIpv4(from).into()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(NetworkError::ReceiveFailed(e.to_string()).into()),
        }
    }

    fn send_to(&self, buf: &[u8], addr: SocketAddrV4) -> Result<usize> {
        self.inner
            .send_to(buf, addr)
            .map_err(|e| NetworkError::SendFailed(e.to_string()).into())
    }

    fn local_addr(&self) -> Result<SocketAddrV4> {
        match self.inner.local_addr()? {
            SocketAddr::V4(addr) => Ok(addr),
            other => Err(NetworkError::NotIpv4(other).into()),
        }
    }

    fn broadcast_addr(&self) -> Ipv4Addr {
        self.broadcast
    }
}

type Inbox = VecDeque<(Vec<u8>, SocketAddrV4)>;

/// In-process datagram network
///
/// Datagrams to the limited broadcast address reach every other socket bound
/// to the destination port.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    inboxes: Arc<Mutex<HashMap<SocketAddrV4, Inbox>>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a socket at `addr`
    pub fn bind(&self, addr: SocketAddrV4) -> MemorySocket {
        self.inboxes.lock().entry(addr).or_default();
        MemorySocket {
            addr,
            network: self.clone(),
            fail_sends: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Deliver a datagram as if it came from `from`
    pub fn inject(&self, from: SocketAddrV4, to: SocketAddrV4, data: &[u8]) {
        let mut inboxes = self.inboxes.lock();
        if *to.ip() == Ipv4Addr::BROADCAST {
            for (addr, inbox) in inboxes.iter_mut() {
                if addr.port() == to.port() && *addr != from {
                    inbox.push_back((data.to_vec(), from));
                }
            }
        } else if let Some(inbox) = inboxes.get_mut(&to) {
            inbox.push_back((data.to_vec(), from));
        }
    }

    /// Datagrams waiting for `addr`
    pub fn pending(&self, addr: SocketAddrV4) -> usize {
        self.inboxes.lock().get(&addr).map_or(0, VecDeque::len)
    }
}

/// Socket attached to a [`MemoryNetwork`]
#[derive(Clone)]
pub struct MemorySocket {
    addr: SocketAddrV4,
    network: MemoryNetwork,
    fail_sends: Arc<AtomicBool>,
}

impl MemorySocket {
    /// Make every send fail until cleared
    pub fn set_send_failure(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::Relaxed);
    }
}

impl DatagramSocket for MemorySocket {
    fn recv_from(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddrV4)>> {
        let mut inboxes = self.network.inboxes.lock();
        let Some((data, from)) = inboxes.get_mut(&self.addr).and_then(VecDeque::pop_front) else {
            return Ok(None);
        };
        // like UDP, the excess of an oversized datagram is lost
        let len = data.len().min(buf.len());
        buf[..len].copy_from_slice(&data[..len]);
        Ok(Some((len, from)))
    }

    fn send_to(&self, buf: &[u8], addr: SocketAddrV4) -> Result<usize> {
        if self.fail_sends.load(Ordering::Relaxed) {
            return Err(NetworkError::SendFailed("link down".to_string()).into());
        }
        self.network.inject(self.addr, addr, buf);
        Ok(buf.len())
    }

    fn local_addr(&self) -> Result<SocketAddrV4> {
        Ok(self.addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(last: u8) -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, last), 6980)
    }

    #[test]
    fn test_memory_unicast() {
        let net = MemoryNetwork::new();
        let a = net.bind(addr(1));
        let b = net.bind(addr(2));

        a.send_to(b"hello", addr(2)).unwrap();
        let mut buf = [0u8; 16];
        let (len, from) = b.recv_from(&mut buf).unwrap().unwrap();
        assert_eq!(&buf[..len], b"hello");
        assert_eq!(from, addr(1));
        assert!(b.recv_from(&mut buf).unwrap().is_none());
        assert!(a.recv_from(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_memory_broadcast_skips_sender() {
        let net = MemoryNetwork::new();
        let a = net.bind(addr(1));
        let _b = net.bind(addr(2));
        let _c = net.bind(addr(3));

        a.send_to(b"x", SocketAddrV4::new(Ipv4Addr::BROADCAST, 6980)).unwrap();
        assert_eq!(net.pending(addr(1)), 0);
        assert_eq!(net.pending(addr(2)), 1);
        assert_eq!(net.pending(addr(3)), 1);
    }

    #[test]
    fn test_send_failure_flag() {
        let net = MemoryNetwork::new();
        let a = net.bind(addr(1));
        a.set_send_failure(true);
        assert!(a.send_to(b"x", addr(2)).is_err());
        a.set_send_failure(false);
        assert!(a.send_to(b"x", addr(2)).is_ok());
    }

    #[test]
    fn test_udp_socket_would_block_is_none() {
        let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)).unwrap();
        let mut buf = [0u8; 64];
        assert!(socket.recv_from(&mut buf).unwrap().is_none());
        assert_eq!(socket.broadcast_addr(), Ipv4Addr::BROADCAST);
        assert!(socket.local_addr().unwrap().port() != 0);
    }
}
