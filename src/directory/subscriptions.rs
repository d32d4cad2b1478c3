//! Consumer subscriptions
//!
//! A subscription names the stream a consumer wants and, optionally, where it
//! must come from. It can exist long before any matching stream shows up; the
//! matcher links the two once they agree.

use serde::Serialize;
use std::net::Ipv4Addr;

use crate::protocol::header::{ACCEPTED_AUDIO_FORMAT_SR, RATE_MASK, SERIAL_STREAM_MIDI};
use crate::protocol::{StreamName, SubProtocol};
use crate::transport::queues::QueueHandle;

/// What a consumer is asking for
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionSpec {
    pub stream_name: StreamName,
    /// Source hostname, resolved through the host directory
    pub hostname: Option<String>,
    /// Source address; `Some(0.0.0.0)` accepts any source
    pub addr: Option<Ipv4Addr>,
    /// Exact `format_SR` byte the stream must carry
    pub protocol: u8,
    /// Service type (`format_nbc`) filter for service streams
    pub service_type: Option<u8>,
    /// Exact `format_bit` byte; selects MIDI among serial streams
    pub format_bit: Option<u8>,
}

impl SubscriptionSpec {
    /// Audio in the accepted profile
    pub fn audio(stream_name: StreamName) -> Self {
        Self::with_protocol(stream_name, ACCEPTED_AUDIO_FORMAT_SR)
    }

    /// Service stream, optionally restricted to one service type
    pub fn service(stream_name: StreamName, service_type: Option<u8>) -> Self {
        Self {
            service_type,
            ..Self::with_protocol(stream_name, SubProtocol::Service.shifted())
        }
    }

    /// Serial (or MIDI) stream at the given bit-rate index
    pub fn serial(stream_name: StreamName, bps_index: u8) -> Self {
        Self::with_protocol(stream_name, SubProtocol::Serial.shifted() | (bps_index & RATE_MASK))
    }

    /// MIDI over the serial sub-protocol; plain serial streams are refused
    pub fn midi(stream_name: StreamName, bps_index: u8) -> Self {
        Self {
            format_bit: Some(SERIAL_STREAM_MIDI),
            ..Self::serial(stream_name, bps_index)
        }
    }

    pub fn with_protocol(stream_name: StreamName, protocol: u8) -> Self {
        Self {
            stream_name,
            hostname: None,
            addr: None,
            protocol,
            service_type: None,
            format_bit: None,
        }
    }

    /// Only accept the stream from the host that identified itself as `hostname`
    pub fn from_host(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    /// Only accept the stream from `addr`; the unspecified address means any
    pub fn from_addr(mut self, addr: Ipv4Addr) -> Self {
        self.addr = Some(addr);
        self
    }

    /// Neither address nor hostname given
    pub fn is_promiscuous(&self) -> bool {
        self.addr.is_none() && self.hostname.is_none()
    }
}

/// One slot of the subscription table
#[derive(Debug, Clone)]
pub struct Subscription {
    pub spec: SubscriptionSpec,
    pub queue: QueueHandle,
    /// Linked inbound stream
    pub stream: Option<usize>,
    pub active: bool,
}

impl Default for Subscription {
    fn default() -> Self {
        Self {
            spec: SubscriptionSpec::with_protocol(StreamName::default(), 0),
            queue: QueueHandle::default(),
            stream: None,
            active: false,
        }
    }
}

/// Fixed-capacity subscription table
#[derive(Debug, Clone)]
pub struct SubscriptionTable {
    slots: Vec<Subscription>,
}

impl SubscriptionTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![Subscription::default(); capacity],
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Store a subscription in the first free slot
    ///
    /// A queue may back only one subscription; adding it again returns the
    /// existing slot unchanged.
    pub fn add(&mut self, spec: SubscriptionSpec, queue: QueueHandle) -> Option<usize> {
        if let Some(existing) = self.find_by_queue(&queue) {
            tracing::debug!("Queue already subscribed in slot {}", existing);
            return Some(existing);
        }
        let slot = self.slots.iter().position(|s| !s.active)?;
        tracing::debug!(
            "Subscribed to '{}' (proto 0x{:02X}) in slot {}",
            spec.stream_name,
            spec.protocol,
            slot
        );
        self.slots[slot] = Subscription {
            spec,
            queue,
            stream: None,
            active: true,
        };
        Some(slot)
    }

    /// Free a slot, returning the stream it was linked to
    pub fn remove(&mut self, index: usize) -> Option<usize> {
        let sub = self.slots.get_mut(index)?;
        if !sub.active {
            return None;
        }
        sub.active = false;
        sub.queue = QueueHandle::default();
        sub.stream.take()
    }

    /// Active subscription whose queue is `queue`
    pub fn find_by_queue(&self, queue: &QueueHandle) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.active && s.queue.same_queue(queue))
    }

    /// Active subscriptions whose owner has dropped the queue
    pub fn orphans(&self) -> Vec<usize> {
        self.iter()
            .filter(|(_, s)| !s.queue.is_alive())
            .map(|(i, _)| i)
            .collect()
    }

    pub fn get(&self, index: usize) -> Option<&Subscription> {
        self.slots.get(index).filter(|s| s.active)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Subscription> {
        self.slots.get_mut(index).filter(|s| s.active)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &Subscription)> {
        self.slots.iter().enumerate().filter(|(_, s)| s.active)
    }

    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|s| s.active).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::header::SERVICE_CHAT_UTF8;
    use crate::transport::queues::PacketQueue;

    fn name(s: &str) -> StreamName {
        StreamName::truncated(s)
    }

    #[test]
    fn test_spec_protocol_bytes() {
        assert_eq!(SubscriptionSpec::audio(name("a")).protocol, 0x10);
        let chat = SubscriptionSpec::service(name("c"), Some(SERVICE_CHAT_UTF8));
        assert_eq!(chat.protocol, 0x60);
        assert_eq!(chat.service_type, Some(SERVICE_CHAT_UTF8));
        assert_eq!(SubscriptionSpec::serial(name("m"), 11).protocol, 0x2B);
    }

    #[test]
    fn test_promiscuous() {
        let spec = SubscriptionSpec::audio(name("a"));
        assert!(spec.is_promiscuous());
        assert!(!spec.clone().from_addr(Ipv4Addr::UNSPECIFIED).is_promiscuous());
        assert!(!spec.from_host("studio").is_promiscuous());
    }

    #[test]
    fn test_add_first_fit_and_full() {
        let mut table = SubscriptionTable::new(2);
        let q1 = PacketQueue::new(4);
        let q2 = PacketQueue::new(4);
        let q3 = PacketQueue::new(4);
        assert_eq!(table.add(SubscriptionSpec::audio(name("a")), q1.handle()), Some(0));
        assert_eq!(table.add(SubscriptionSpec::audio(name("b")), q2.handle()), Some(1));
        assert_eq!(table.add(SubscriptionSpec::audio(name("c")), q3.handle()), None);

        table.remove(0);
        assert_eq!(table.add(SubscriptionSpec::audio(name("c")), q3.handle()), Some(0));
    }

    #[test]
    fn test_same_queue_subscribes_once() {
        let mut table = SubscriptionTable::new(4);
        let q = PacketQueue::new(4);
        assert_eq!(table.add(SubscriptionSpec::audio(name("a")), q.handle()), Some(0));
        assert_eq!(table.add(SubscriptionSpec::audio(name("b")), q.handle()), Some(0));
        assert_eq!(table.active_count(), 1);
    }

    #[test]
    fn test_remove_returns_link() {
        let mut table = SubscriptionTable::new(4);
        let q = PacketQueue::new(4);
        let idx = table.add(SubscriptionSpec::audio(name("a")), q.handle()).unwrap();
        table.get_mut(idx).unwrap().stream = Some(3);
        assert_eq!(table.remove(idx), Some(3));
        assert_eq!(table.remove(idx), None);
        assert!(table.get(idx).is_none());
    }

    #[test]
    fn test_orphans() {
        let mut table = SubscriptionTable::new(4);
        let kept = PacketQueue::new(4);
        let dropped = PacketQueue::new(4);
        table.add(SubscriptionSpec::audio(name("a")), kept.handle());
        table.add(SubscriptionSpec::audio(name("b")), dropped.handle());
        assert!(table.orphans().is_empty());
        drop(dropped);
        assert_eq!(table.orphans(), vec![1]);
    }
}
