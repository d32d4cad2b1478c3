//! Stream directory: named, addressed streams with liveness tracking
//!
//! One table per direction. Inbound slots are created by the first accepted
//! packet of a new (name, address) pair; outbound slots are created by local
//! producers registering an output.
//!
//! Slot choice is part of the observable behaviour: the first matching or
//! first free slot in scan order always wins.

use serde::Serialize;
use std::net::Ipv4Addr;

use crate::protocol::header::SERVICE_IDENTIFICATION;
use crate::protocol::{PacketKind, StreamName, SubProtocol, WireHeader};

/// Per-stream packet counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StreamStats {
    /// Packets seen for this stream
    pub packets: u64,
    /// Packets placed on a subscriber queue
    pub queued: u64,
    /// Packets handed to the socket (outputs only)
    pub sent: u64,
    /// Packets discarded because the queue was full
    pub tail_drops: u64,
    /// Packets discarded because nobody was subscribed
    pub unsubscribed: u64,
    /// Sum of frame-number gaps observed on enqueue
    pub frames_dropped: u64,
}

/// One slot of a stream table
#[derive(Debug, Clone)]
pub struct StreamRecord {
    /// Latest header seen (inbound) or the template header (outbound)
    pub header: WireHeader,
    /// Source address (inbound) or target address (outbound)
    pub addr: Ipv4Addr,
    /// Millisecond timestamp of the last packet; `None` if the slot was never used
    pub last_packet: Option<u64>,
    /// Frame number of the last packet placed on a queue
    pub last_frame: Option<u32>,
    /// Index into the host directory
    pub host: Option<usize>,
    /// Index into the subscription table
    pub subscription: Option<usize>,
    pub kind: PacketKind,
    pub active: bool,
    pub stats: StreamStats,
}

impl Default for StreamRecord {
    fn default() -> Self {
        Self {
            header: WireHeader::default(),
            addr: Ipv4Addr::UNSPECIFIED,
            last_packet: None,
            last_frame: None,
            host: None,
            subscription: None,
            kind: PacketKind::NotConsumed,
            active: false,
            stats: StreamStats::default(),
        }
    }
}

impl StreamRecord {
    pub fn name(&self) -> &StreamName {
        &self.header.stream_name
    }

    fn matches(&self, name: &StreamName, addr: Ipv4Addr) -> bool {
        self.header.stream_name == *name && self.addr == addr
    }
}

/// Whether a packet may own an inbound stream slot
pub fn is_registrable(hdr: &WireHeader, kind: PacketKind) -> bool {
    if !kind.is_queueable() {
        return false;
    }
    if kind.is_audio() && !hdr.is_accepted_audio() {
        return false;
    }
    !(hdr.sub_protocol() == SubProtocol::Service && hdr.service_type() == SERVICE_IDENTIFICATION)
}

/// Fixed-capacity stream table
#[derive(Debug, Clone)]
pub struct StreamDirectory {
    slots: Vec<StreamRecord>,
}

impl StreamDirectory {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![StreamRecord::default(); capacity],
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Find or create the inbound slot for a packet
    ///
    /// Returns `None` for packets that may not be registered (out-of-profile
    /// audio, text, identification) and when the table is full. A slot that
    /// went inactive is reused at once if the same (name, address) comes back;
    /// otherwise a never-used slot is preferred over one that has been
    /// inactive for longer than `dead_after_ms`.
    pub fn register(
        &mut self,
        hdr: &WireHeader,
        addr: Ipv4Addr,
        kind: PacketKind,
        now: u64,
        dead_after_ms: u64,
    ) -> Option<usize> {
        if !is_registrable(hdr, kind) {
            tracing::trace!("Not registering {:?} packet '{}'", kind, hdr.stream_name);
            return None;
        }

        let mut recurrence = None;
        let mut never_used = None;
        let mut dead = None;

        for (i, stream) in self.slots.iter_mut().enumerate() {
            if stream.active {
                if stream.matches(&hdr.stream_name, addr) {
                    // format fields may legitimately change between packets
                    stream.header = *hdr;
                    stream.kind = kind;
                    stream.last_packet = Some(now);
                    return Some(i);
                }
                continue;
            }

            match stream.last_packet {
                None => {
                    if never_used.is_none() {
                        never_used = Some(i);
                    }
                }
                Some(last) => {
                    if recurrence.is_none() && stream.matches(&hdr.stream_name, addr) {
                        recurrence = Some(i);
                    }
                    if dead.is_none() && now.saturating_sub(last) > dead_after_ms {
                        dead = Some(i);
                    }
                }
            }
        }

        let slot = match recurrence {
            Some(slot) => {
                let stream = &mut self.slots[slot];
                stream.header = *hdr;
                stream.kind = kind;
                stream.last_packet = Some(now);
                stream.subscription = None;
                stream.active = true;
                slot
            }
            None => {
                let slot = never_used.or(dead)?;
                self.slots[slot] = StreamRecord {
                    header: *hdr,
                    addr,
                    last_packet: Some(now),
                    kind,
                    active: true,
                    ..StreamRecord::default()
                };
                slot
            }
        };

        tracing::debug!(
            "Registered stream '{}' from {} in slot {} ({:?})",
            hdr.stream_name,
            addr,
            slot,
            kind
        );
        Some(slot)
    }

    /// Claim the first inactive slot for a local output stream
    pub fn allocate(&mut self, header: WireHeader, addr: Ipv4Addr, kind: PacketKind) -> Option<usize> {
        let slot = self.slots.iter().position(|s| !s.active)?;
        self.slots[slot] = StreamRecord {
            header,
            addr,
            kind,
            active: true,
            ..StreamRecord::default()
        };
        Some(slot)
    }

    /// Mark a slot inactive, returning the subscription it was linked to
    pub fn deactivate(&mut self, index: usize) -> Option<usize> {
        let stream = self.slots.get_mut(index)?;
        stream.active = false;
        stream.subscription.take()
    }

    /// Deactivate active streams with no packet for longer than `stale_after_ms`
    ///
    /// Returns `(stream, former subscription)` for each stream aged out.
    pub fn age(&mut self, now: u64, stale_after_ms: u64) -> Vec<(usize, Option<usize>)> {
        let mut aged = Vec::new();
        for (i, stream) in self.slots.iter_mut().enumerate() {
            if !stream.active {
                continue;
            }
            let idle = stream.last_packet.map_or(0, |t| now.saturating_sub(t));
            if idle > stale_after_ms {
                stream.active = false;
                aged.push((i, stream.subscription.take()));
                tracing::debug!(
                    "Stream '{}' from {} went quiet ({} ms)",
                    stream.header.stream_name,
                    stream.addr,
                    idle
                );
            }
        }
        aged
    }

    /// Active slot holding (name, address)
    pub fn find(&self, name: &StreamName, addr: Ipv4Addr) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.active && s.matches(name, addr))
    }

    /// Active stream currently linked to `subscription`
    pub fn find_by_subscription(&self, subscription: usize) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.active && s.subscription == Some(subscription))
    }

    /// Record at `index`, active or not
    pub fn slot(&self, index: usize) -> Option<&StreamRecord> {
        self.slots.get(index)
    }

    pub fn slot_mut(&mut self, index: usize) -> Option<&mut StreamRecord> {
        self.slots.get_mut(index)
    }

    /// Active record at `index`
    pub fn get(&self, index: usize) -> Option<&StreamRecord> {
        self.slots.get(index).filter(|s| s.active)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut StreamRecord> {
        self.slots.get_mut(index).filter(|s| s.active)
    }

    /// Iterate `(index, stream)` over active streams
    pub fn iter(&self) -> impl Iterator<Item = (usize, &StreamRecord)> {
        self.slots.iter().enumerate().filter(|(_, s)| s.active)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut StreamRecord)> {
        self.slots.iter_mut().enumerate().filter(|(_, s)| s.active)
    }

    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|s| s.active).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::header::{SERVICE_CHAT_UTF8, SERVICE_FUNCTION_REQUEST};

    const DEAD: u64 = 6000;

    fn ip(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, last)
    }

    fn audio(name: &str) -> WireHeader {
        WireHeader::audio(StreamName::truncated(name), 128, 2, 0)
    }

    #[test]
    fn test_same_stream_same_slot() {
        let mut dir = StreamDirectory::new(8);
        let a = dir.register(&audio("s1"), ip(1), PacketKind::Audio, 0, DEAD);
        let b = dir.register(&audio("s1"), ip(1), PacketKind::Audio, 10, DEAD);
        assert_eq!(a, Some(0));
        assert_eq!(a, b);
        assert_eq!(dir.active_count(), 1);
        assert_eq!(dir.get(0).unwrap().last_packet, Some(10));
    }

    #[test]
    fn test_name_and_address_both_identify() {
        let mut dir = StreamDirectory::new(8);
        assert_eq!(dir.register(&audio("s1"), ip(1), PacketKind::Audio, 0, DEAD), Some(0));
        assert_eq!(dir.register(&audio("s1"), ip(2), PacketKind::Audio, 0, DEAD), Some(1));
        assert_eq!(dir.register(&audio("s2"), ip(1), PacketKind::Audio, 0, DEAD), Some(2));
    }

    #[test]
    fn test_header_updates_in_place() {
        let mut dir = StreamDirectory::new(8);
        dir.register(&audio("s1"), ip(1), PacketKind::Audio, 0, DEAD);
        let changed = WireHeader::audio(StreamName::truncated("s1"), 64, 4, 9);
        assert_eq!(dir.register(&changed, ip(1), PacketKind::Audio, 1, DEAD), Some(0));
        assert_eq!(dir.get(0).unwrap().header.channels(), 4);
    }

    #[test]
    fn test_full_table_returns_none() {
        let mut dir = StreamDirectory::new(8);
        for i in 0..8 {
            let name = format!("s{}", i);
            assert_eq!(dir.register(&audio(&name), ip(1), PacketKind::Audio, 0, DEAD), Some(i));
        }
        assert_eq!(dir.register(&audio("s8"), ip(1), PacketKind::Audio, 0, DEAD), None);
    }

    #[test]
    fn test_rejects_unregistrable_packets() {
        let mut dir = StreamDirectory::new(8);
        let text = WireHeader {
            format_sr: SubProtocol::Text.shifted(),
            ..audio("t")
        };
        assert_eq!(dir.register(&text, ip(1), PacketKind::Text, 0, DEAD), None);

        let ping = WireHeader::service(StreamName::truncated("p"), SERVICE_IDENTIFICATION, SERVICE_FUNCTION_REQUEST, 0);
        assert_eq!(dir.register(&ping, ip(1), PacketKind::Ping, 0, DEAD), None);
        assert_eq!(dir.register(&ping, ip(1), PacketKind::Service, 0, DEAD), None);

        let wrong_rate = WireHeader { format_sr: 3, ..audio("a") };
        assert_eq!(dir.register(&wrong_rate, ip(1), PacketKind::Audio, 0, DEAD), None);

        let chat = WireHeader::service(StreamName::truncated("c"), SERVICE_CHAT_UTF8, SERVICE_FUNCTION_REQUEST, 0);
        assert_eq!(dir.register(&chat, ip(1), PacketKind::Chat, 0, DEAD), Some(0));
        assert_eq!(dir.active_count(), 1);
    }

    #[test]
    fn test_dead_slot_reclaimed_only_after_timeout() {
        let mut dir = StreamDirectory::new(2);
        dir.register(&audio("a"), ip(1), PacketKind::Audio, 0, DEAD);
        dir.register(&audio("b"), ip(1), PacketKind::Audio, 0, DEAD);

        // "a" goes quiet
        dir.get_mut(1).unwrap().last_packet = Some(3500);
        let aged = dir.age(3500, 3000);
        assert_eq!(aged, vec![(0, None)]);

        // inactive but not yet dead
        assert_eq!(dir.register(&audio("c"), ip(1), PacketKind::Audio, 4000, DEAD), None);
        // dead
        assert_eq!(dir.register(&audio("c"), ip(1), PacketKind::Audio, 6001, DEAD), Some(0));
        assert_eq!(dir.get(0).unwrap().name().to_string(), "c");
    }

    #[test]
    fn test_recurring_stream_reuses_its_slot_immediately() {
        let mut dir = StreamDirectory::new(4);
        dir.register(&audio("a"), ip(1), PacketKind::Audio, 0, DEAD);
        dir.age(3100, 3000);
        assert_eq!(dir.active_count(), 0);
        assert_eq!(dir.register(&audio("a"), ip(1), PacketKind::Audio, 3200, DEAD), Some(0));
        assert_eq!(dir.register(&audio("b"), ip(1), PacketKind::Audio, 3200, DEAD), Some(1));
    }

    #[test]
    fn test_never_used_preferred_over_dead() {
        let mut dir = StreamDirectory::new(3);
        dir.register(&audio("a"), ip(1), PacketKind::Audio, 0, DEAD);
        dir.age(10_000, 3000);
        assert_eq!(dir.register(&audio("b"), ip(1), PacketKind::Audio, 10_000, DEAD), Some(1));
        assert_eq!(dir.register(&audio("c"), ip(1), PacketKind::Audio, 10_000, DEAD), Some(2));
        assert_eq!(dir.register(&audio("d"), ip(1), PacketKind::Audio, 10_000, DEAD), Some(0));
    }

    #[test]
    fn test_allocate_output_first_fit() {
        let mut dir = StreamDirectory::new(2);
        let hdr = audio("out");
        assert_eq!(dir.allocate(hdr, ip(255), PacketKind::Audio), Some(0));
        assert_eq!(dir.allocate(hdr, ip(255), PacketKind::Audio), Some(1));
        assert_eq!(dir.allocate(hdr, ip(255), PacketKind::Audio), None);
        dir.deactivate(0);
        assert_eq!(dir.allocate(hdr, ip(9), PacketKind::Audio), Some(0));
    }
}
