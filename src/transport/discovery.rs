//! Host discovery over Service/Identification pings
//!
//! Any ping, request or reply, names its sender. Requests get exactly one
//! reply. Housekeeping pings hosts that have sent us packets but never
//! said who they are, one host per pass.

use bytes::BytesMut;
use std::net::{Ipv4Addr, SocketAddrV4};

use super::clock::Clock;
use super::socket::DatagramSocket;
use super::Transport;
use crate::constants::HEADER_SIZE;
use crate::directory::matching;
use crate::error::Result;
use crate::protocol::header::{
    SERVICE_FUNCTION_REPLY, SERVICE_FUNCTION_REQUEST, SERVICE_IDENTIFICATION,
};
use crate::protocol::ping::PING_PAYLOAD_SIZE;
use crate::protocol::{PingPayload, StreamName, WireHeader};

/// Stream name carried by identification packets
pub const PING_STREAM_NAME: &str = "VBAN Service";

impl<S: DatagramSocket, C: Clock> Transport<S, C> {
    /// Record the sender's identity, re-match its streams, answer requests
    ///
    /// Returns the sender's host slot.
    pub fn process_incoming_ping(
        &mut self,
        from: SocketAddrV4,
        hdr: &WireHeader,
        payload: &[u8],
    ) -> Option<usize> {
        self.stats.pings_received += 1;
        let addr = *from.ip();
        let host = self.hosts.add_host(addr)?;

        let ping = match PingPayload::decode(payload) {
            Ok(ping) => ping,
            Err(e) => {
                tracing::debug!("Bad ping from {}: {}", from, e);
                self.stats.malformed += 1;
                return Some(host);
            }
        };

        let renamed = self.hosts.set_identity(host, &ping);
        if renamed {
            tracing::info!(
                "Host {} is '{}' ({} {})",
                addr,
                ping.host_name,
                ping.application_name,
                ping.version_string()
            );
        }

        for (_, stream) in self.streams.iter_mut() {
            if stream.addr == addr {
                stream.host = Some(host);
            }
        }
        self.outputs.set_host_for_addr(addr, host);
        matching::match_host_streams(&mut self.streams, &mut self.subscriptions, &self.hosts, addr);
        if renamed {
            // a new or dropped name can move hostname subscriptions to other hosts
            matching::sweep(&mut self.streams, &mut self.subscriptions, &self.hosts);
        }

        if hdr.is_request() {
            if let Err(e) = self.send_ping_to(from, false, hdr.frame) {
                tracing::warn!("Ping reply to {} failed: {}", from, e);
            }
        }
        Some(host)
    }

    /// Ping the first unnamed host not pinged within the retry interval
    pub fn ping_unknown_hosts(&mut self) -> Option<usize> {
        let now = self.clock.now_ms();
        let host = self.hosts.next_to_ping(now, self.config.ping_retry_ms)?;
        self.hosts.mark_pinged(host, now);
        let addr = self.hosts.get(host)?.addr;
        tracing::debug!("Probing unnamed host {}", addr);
        if let Err(e) = self.send_ping(addr, true) {
            tracing::warn!("Ping to {} failed: {}", addr, e);
        }
        Some(host)
    }

    /// Send our identification to `addr`; the unspecified address broadcasts
    pub fn send_ping(&mut self, addr: Ipv4Addr, request: bool) -> Result<()> {
        let ip = if addr.is_unspecified() {
            self.socket.broadcast_addr()
        } else {
            addr
        };
        let frame = self.ping_frame;
        self.ping_frame = self.ping_frame.wrapping_add(1);
        self.send_ping_to(SocketAddrV4::new(ip, self.remote_port), request, frame)
    }

    fn send_ping_to(&mut self, to: SocketAddrV4, request: bool, frame: u32) -> Result<()> {
        let function = if request {
            SERVICE_FUNCTION_REQUEST
        } else {
            SERVICE_FUNCTION_REPLY
        };
        let hdr = WireHeader::service(
            StreamName::truncated(PING_STREAM_NAME),
            SERVICE_IDENTIFICATION,
            function,
            frame,
        );

        let mut buf = BytesMut::with_capacity(HEADER_SIZE + PING_PAYLOAD_SIZE);
        hdr.encode(&mut buf);
        self.identity.encode_into(&mut buf);

        match self.socket.send_to(&buf, to) {
            Ok(_) => {
                self.stats.pings_sent += 1;
                Ok(())
            }
            Err(e) => {
                self.stats.send_failures += 1;
                Err(e)
            }
        }
    }
}
