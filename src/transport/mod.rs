//! Transport context and the per-tick driver
//!
//! [`Transport`] owns the socket, the clock and every directory table. The
//! caller runs [`Transport::poll`] once per audio period; consumers drain
//! their own queues separately.

pub mod clock;
mod discovery;
pub mod output;
pub mod queues;
pub mod snapshot;
pub mod socket;

use serde::Serialize;
use std::net::{Ipv4Addr, SocketAddrV4};

use crate::config::{AppConfig, TransportConfig};
use crate::constants::{HEADER_SIZE, MAX_DATAGRAM_SIZE};
use crate::directory::{
    matching, HostDirectory, StreamDirectory, StreamRecord, SubscriptionSpec, SubscriptionTable,
};
use crate::protocol::{classify, PacketKind, PingPayload, StreamName, SubProtocol, WireHeader};

pub use clock::{Clock, ManualClock, SystemClock};
pub use output::{OutputStreams, SendReport};
pub use queues::{add_packet_to_queue, EnqueueOutcome, PacketQueue, QueueHandle, QueuedPacket};
pub use snapshot::Snapshot;
pub use socket::{DatagramSocket, MemoryNetwork, MemorySocket, UdpSocket};

/// Transport-wide counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransportStats {
    pub datagrams_received: u64,
    pub bytes_received: u64,
    pub receive_errors: u64,
    /// Bad magic, short header, out-of-profile audio, reserved protocols
    pub not_consumed: u64,
    /// Text packets (classified but never registered)
    pub text_ignored: u64,
    /// Packets whose size disagrees with their header
    pub malformed: u64,
    /// Packets refused a stream slot (table full)
    pub unregistered: u64,
    pub queued: u64,
    pub tail_drops: u64,
    pub unsubscribed: u64,
    pub pings_received: u64,
    pub pings_sent: u64,
    pub datagrams_sent: u64,
    pub send_failures: u64,
    pub housekeeping_runs: u64,
    pub streams_aged: u64,
}

/// Work done by one [`Transport::poll`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    pub received: usize,
    pub sent: usize,
    pub send_failures: usize,
    pub housekeeping: bool,
}

/// The transport context
pub struct Transport<S: DatagramSocket, C: Clock> {
    socket: S,
    clock: C,
    config: TransportConfig,
    remote_port: u16,
    identity: PingPayload,
    hosts: HostDirectory,
    streams: StreamDirectory,
    subscriptions: SubscriptionTable,
    outputs: OutputStreams,
    ping_frame: u32,
    last_housekeeping: Option<u64>,
    stats: TransportStats,
    recv_buf: Vec<u8>,
}

impl<S: DatagramSocket, C: Clock> Transport<S, C> {
    /// Create a transport with explicit settings
    pub fn new(
        socket: S,
        clock: C,
        config: TransportConfig,
        identity: PingPayload,
        remote_port: u16,
    ) -> Self {
        Self {
            hosts: HostDirectory::new(config.max_hosts),
            streams: StreamDirectory::new(config.max_streams),
            subscriptions: SubscriptionTable::new(config.max_subscriptions),
            outputs: OutputStreams::new(config.max_streams),
            socket,
            clock,
            config,
            remote_port,
            identity,
            ping_frame: 0,
            last_housekeeping: None,
            stats: TransportStats::default(),
            recv_buf: vec![0u8; MAX_DATAGRAM_SIZE],
        }
    }

    /// Create a transport from the application config
    pub fn from_config(socket: S, clock: C, config: &AppConfig) -> Self {
        Self::new(
            socket,
            clock,
            config.transport.clone(),
            config.identity.ping_payload(),
            config.network.remote_port,
        )
    }

    /// One tick: receive everything pending, transmit one packet per output
    /// stream, and run housekeeping when its interval has elapsed.
    pub fn poll(&mut self) -> PollReport {
        let mut report = PollReport {
            received: self.receive_pending(),
            ..PollReport::default()
        };

        let now = self.clock.now_ms();
        let broadcast = self.socket.broadcast_addr();
        let sent = self
            .outputs
            .send_pending(&self.socket, now, self.remote_port, broadcast);
        self.stats.datagrams_sent += sent.sent as u64;
        self.stats.send_failures += sent.failed as u64;
        report.sent = sent.sent;
        report.send_failures = sent.failed;

        let due = self
            .last_housekeeping
            .map_or(true, |last| now.saturating_sub(last) >= self.config.housekeeping_interval_ms);
        if due {
            self.housekeeping();
            report.housekeeping = true;
        }
        report
    }

    /// Drain the socket until it has nothing more to give
    fn receive_pending(&mut self) -> usize {
        let mut count = 0;
        loop {
            let mut buf = std::mem::take(&mut self.recv_buf);
            let received = self.socket.recv_from(&mut buf);
            let next = match received {
                Ok(Some((len, from))) => {
                    self.process_datagram(&buf[..len], from);
                    count += 1;
                    true
                }
                Ok(None) => false,
                Err(e) => {
                    self.stats.receive_errors += 1;
                    tracing::warn!("Receive error: {}", e);
                    false
                }
            };
            self.recv_buf = buf;
            if !next {
                return count;
            }
        }
    }

    /// Handle one incoming datagram; returns how it was classified
    pub fn process_datagram(&mut self, data: &[u8], from: SocketAddrV4) -> PacketKind {
        self.stats.datagrams_received += 1;
        self.stats.bytes_received += data.len() as u64;

        let hdr = match WireHeader::decode(data) {
            Ok(hdr) => hdr,
            Err(e) => {
                tracing::trace!("Ignoring datagram from {}: {}", from, e);
                self.stats.not_consumed += 1;
                return PacketKind::NotConsumed;
            }
        };

        let addr = *from.ip();
        let host = self.hosts.add_host(addr);
        let kind = classify(&hdr);
        tracing::trace!("{} from {} ({:?})", hdr, from, kind);

        match kind {
            PacketKind::NotConsumed => self.stats.not_consumed += 1,
            PacketKind::Text => self.stats.text_ignored += 1,
            PacketKind::Ping => {
                let payload = data.get(HEADER_SIZE..).unwrap_or_default();
                self.process_incoming_ping(from, &hdr, payload);
            }
            _ => self.accept_stream_packet(&hdr, addr, host, kind, data),
        }
        kind
    }

    fn accept_stream_packet(
        &mut self,
        hdr: &WireHeader,
        addr: Ipv4Addr,
        host: Option<usize>,
        kind: PacketKind,
        data: &[u8],
    ) {
        let now = self.clock.now_ms();
        let Some(index) = self
            .streams
            .register(hdr, addr, kind, now, self.config.dead_stream_ms)
        else {
            self.stats.unregistered += 1;
            return;
        };

        let unmatched = match self.streams.get_mut(index) {
            Some(stream) => {
                stream.host = host;
                stream.subscription.is_none()
            }
            None => return,
        };
        if unmatched {
            matching::match_stream(&mut self.streams, &mut self.subscriptions, &self.hosts, index);
        }

        let Some(stream) = self.streams.get_mut(index) else {
            return;
        };
        match add_packet_to_queue(index, stream, &self.subscriptions, kind, data, now) {
            EnqueueOutcome::Queued => self.stats.queued += 1,
            EnqueueOutcome::QueueFull => self.stats.tail_drops += 1,
            EnqueueOutcome::Malformed => self.stats.malformed += 1,
            EnqueueOutcome::Unsubscribed | EnqueueOutcome::QueueGone => {
                self.stats.unsubscribed += 1
            }
        }
    }

    /// Age streams, drop orphaned subscriptions, re-match, ping unnamed hosts
    pub fn housekeeping(&mut self) {
        let now = self.clock.now_ms();
        self.last_housekeeping = Some(now);
        self.stats.housekeeping_runs += 1;

        for (stream, sub) in self.streams.age(now, self.config.stale_stream_ms) {
            self.stats.streams_aged += 1;
            tracing::debug!("Stream {} went stale", stream);
            if let Some(sub) = sub {
                matching::refresh_back_ref(&self.streams, &mut self.subscriptions, sub);
            }
        }

        for orphan in self.subscriptions.orphans() {
            tracing::debug!("Dropping subscription {}: queue owner is gone", orphan);
            self.unsubscribe(orphan);
        }

        matching::sweep(&mut self.streams, &mut self.subscriptions, &self.hosts);
        self.ping_unknown_hosts();
    }

    /// Subscribe a consumer-owned queue; the stream need not exist yet
    pub fn subscribe(&mut self, spec: SubscriptionSpec, queue: &PacketQueue) -> Option<usize> {
        let index = self.subscriptions.add(spec, queue.handle())?;
        matching::sweep(&mut self.streams, &mut self.subscriptions, &self.hosts);
        Some(index)
    }

    /// Remove a subscription and unlink its stream at once
    ///
    /// Packets already queued stay with the queue owner.
    pub fn unsubscribe(&mut self, index: usize) -> bool {
        let Some(sub) = self.subscriptions.get(index) else {
            return false;
        };
        let linked = sub.stream;
        self.subscriptions.remove(index);
        // clear any stream still pointing at this slot, not only the recorded one
        for (_, stream) in self.streams.iter_mut() {
            if stream.subscription == Some(index) {
                stream.subscription = None;
            }
        }
        tracing::debug!("Unsubscribed slot {} (was linked to {:?})", index, linked);
        true
    }

    /// Inbound stream currently feeding a subscription
    pub fn subscription_stream(&self, index: usize) -> Option<&StreamRecord> {
        let stream = self.subscriptions.get(index)?.stream?;
        self.streams
            .get(stream)
            .filter(|s| s.subscription == Some(index))
    }

    /// Register a local output stream fed from `queue`
    ///
    /// `protocol` is the exact `format_SR` byte; `target` may be the
    /// unspecified address to broadcast.
    pub fn register_output(
        &mut self,
        name: StreamName,
        protocol: u8,
        service_type: u8,
        target: Ipv4Addr,
        queue: &PacketQueue,
    ) -> Option<usize> {
        let template = match SubProtocol::from_format_sr(protocol) {
            SubProtocol::Audio => WireHeader {
                format_sr: protocol,
                ..WireHeader::audio(name, 1, 1, 0)
            },
            _ => WireHeader {
                format_sr: protocol,
                format_nbc: service_type,
                stream_name: name,
                ..WireHeader::default()
            },
        };
        let target = if target.is_unspecified() {
            self.socket.broadcast_addr()
        } else {
            target
        };
        let index = self
            .outputs
            .register(template, target, classify(&template), queue.handle())?;
        if let Some(host) = self.hosts.find_by_addr(target) {
            self.outputs.set_host(index, host);
        }
        Some(index)
    }

    pub fn unregister_output(&mut self, index: usize) -> bool {
        self.outputs.unregister(index)
    }

    pub fn hosts(&self) -> &HostDirectory {
        &self.hosts
    }

    pub fn streams(&self) -> &StreamDirectory {
        &self.streams
    }

    pub fn subscriptions(&self) -> &SubscriptionTable {
        &self.subscriptions
    }

    pub fn outputs(&self) -> &OutputStreams {
        &self.outputs
    }

    pub fn stats(&self) -> TransportStats {
        self.stats
    }

    /// Our own identification payload
    pub fn identity(&self) -> &PingPayload {
        &self.identity
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn socket(&self) -> &S {
        &self.socket
    }
}
