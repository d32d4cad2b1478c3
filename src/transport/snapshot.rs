//! Serializable point-in-time view of the transport
//!
//! Built on the tick thread and handed to readers such as the status server,
//! which never touch the live tables.

use serde::Serialize;
use std::net::Ipv4Addr;

use super::clock::Clock;
use super::socket::DatagramSocket;
use super::{Transport, TransportStats};
use crate::directory::{HostRecord, StreamRecord, StreamStats, SubscriptionSpec};
use crate::protocol::PacketKind;

/// One stream, inbound or outbound
#[derive(Debug, Clone, Serialize)]
pub struct StreamInfo {
    pub index: usize,
    pub name: String,
    pub addr: Ipv4Addr,
    pub hostname: String,
    pub kind: PacketKind,
    pub protocol: &'static str,
    pub sample_rate: Option<u32>,
    pub channels: usize,
    pub samples: usize,
    pub frame: u32,
    /// Milliseconds since the last packet
    pub idle_ms: Option<u64>,
    pub subscription: Option<usize>,
    pub queue_len: Option<usize>,
    pub stats: StreamStats,
}

/// One subscription
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionInfo {
    pub index: usize,
    pub spec: SubscriptionSpec,
    pub stream: Option<usize>,
    pub queue_len: Option<usize>,
}

/// Everything the status API shows
#[derive(Debug, Clone, Default, Serialize)]
pub struct Snapshot {
    pub hostname: String,
    pub now_ms: u64,
    pub stats: TransportStats,
    pub hosts: Vec<HostRecord>,
    pub streams_in: Vec<StreamInfo>,
    pub streams_out: Vec<StreamInfo>,
    pub subscriptions: Vec<SubscriptionInfo>,
}

impl<S: DatagramSocket, C: Clock> Transport<S, C> {
    /// Capture the current state of every table
    pub fn snapshot(&self) -> Snapshot {
        let now = self.clock.now_ms();

        let streams_in = self
            .streams
            .iter()
            .map(|(i, s)| {
                let queue_len = s
                    .subscription
                    .and_then(|sub| self.subscriptions.get(sub))
                    .and_then(|sub| sub.queue.upgrade())
                    .map(|q| q.len());
                self.stream_info(i, s, now, queue_len)
            })
            .collect();

        let streams_out = self
            .outputs
            .iter()
            .map(|(i, s)| {
                let queue_len = self.outputs.queue(i).map(|q| q.len());
                self.stream_info(i, s, now, queue_len)
            })
            .collect();

        let subscriptions = self
            .subscriptions
            .iter()
            .map(|(i, sub)| SubscriptionInfo {
                index: i,
                spec: sub.spec.clone(),
                stream: sub.stream.filter(|&s| self.streams.get(s).is_some()),
                queue_len: sub.queue.upgrade().map(|q| q.len()),
            })
            .collect();

        Snapshot {
            hostname: self.identity.host_name.clone(),
            now_ms: now,
            stats: self.stats,
            hosts: self.hosts.iter().map(|(_, h)| h.clone()).collect(),
            streams_in,
            streams_out,
            subscriptions,
        }
    }

    fn stream_info(&self, index: usize, s: &StreamRecord, now: u64, queue_len: Option<usize>) -> StreamInfo {
        let audio = s.kind.is_audio();
        StreamInfo {
            index,
            name: s.header.stream_name.to_string(),
            addr: s.addr,
            hostname: self.hosts.name_for_addr(s.addr).to_string(),
            kind: s.kind,
            protocol: s.header.sub_protocol().name(),
            sample_rate: s.header.sample_rate(),
            channels: if audio { s.header.channels() } else { 0 },
            samples: if audio { s.header.samples() } else { 0 },
            frame: s.header.frame,
            idle_ms: s.last_packet.map(|t| now.saturating_sub(t)),
            subscription: s.subscription,
            queue_len,
            stats: s.stats,
        }
    }
}
