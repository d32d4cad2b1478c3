//! Packet-oriented input for service, chat, serial and MIDI streams
//!
//! Unlike audio there is no reassembly: each datagram payload is handed to
//! the consumer as one packet, in arrival order.

use std::net::Ipv4Addr;

use crate::directory::SubscriptionSpec;
use crate::protocol::header::SERVICE_CHAT_UTF8;
use crate::protocol::{PacketKind, StreamName};
use crate::transport::{Clock, DatagramSocket, PacketQueue, QueuedPacket, Transport};

/// What a [`DataInput`] subscribes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataKind {
    /// Service stream; `None` accepts every service type except identification
    Service { service_type: Option<u8> },
    /// Serial stream at a bit-rate index
    Serial { bps_index: u8 },
    /// MIDI over the serial sub-protocol
    Midi { bps_index: u8 },
}

impl DataKind {
    pub fn chat() -> Self {
        Self::Service {
            service_type: Some(SERVICE_CHAT_UTF8),
        }
    }

    fn spec(self, name: StreamName) -> SubscriptionSpec {
        match self {
            Self::Service { service_type } => SubscriptionSpec::service(name, service_type),
            Self::Serial { bps_index } => SubscriptionSpec::serial(name, bps_index),
            Self::Midi { bps_index } => SubscriptionSpec::midi(name, bps_index),
        }
    }

    fn packet_kind(self) -> PacketKind {
        match self {
            Self::Service { .. } => PacketKind::Service,
            Self::Serial { .. } => PacketKind::Serial,
            Self::Midi { .. } => PacketKind::Midi,
        }
    }
}

/// Consumer of one non-audio stream
pub struct DataInput {
    kind: DataKind,
    queue: PacketQueue,
    subscription: Option<usize>,
}

impl DataInput {
    pub fn new(kind: DataKind) -> Self {
        Self {
            kind,
            queue: PacketQueue::for_kind(kind.packet_kind()),
            subscription: None,
        }
    }

    pub fn kind(&self) -> DataKind {
        self.kind
    }

    pub fn queue(&self) -> &PacketQueue {
        &self.queue
    }

    pub fn subscription(&self) -> Option<usize> {
        self.subscription
    }

    /// Subscribe to `name`, optionally from one host or address
    pub fn subscribe<S: DatagramSocket, C: Clock>(
        &mut self,
        transport: &mut Transport<S, C>,
        name: StreamName,
        hostname: Option<&str>,
        addr: Option<Ipv4Addr>,
    ) -> Option<usize> {
        if self.subscription.is_some() {
            return self.subscription;
        }
        let mut spec = self.kind.spec(name);
        if let Some(hostname) = hostname {
            spec = spec.from_host(hostname);
        }
        if let Some(addr) = addr {
            spec = spec.from_addr(addr);
        }
        self.subscription = transport.subscribe(spec, &self.queue);
        if self.subscription.is_none() {
            tracing::warn!("No free subscription slot for '{}'", name);
        }
        self.subscription
    }

    pub fn unsubscribe<S: DatagramSocket, C: Clock>(&mut self, transport: &mut Transport<S, C>) {
        if let Some(sub) = self.subscription.take() {
            transport.unsubscribe(sub);
        }
        self.queue.clear();
    }

    /// Whether a packet is waiting
    pub fn available(&self) -> bool {
        self.subscription.is_some() && !self.queue.is_empty()
    }

    /// Packets waiting
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Payload length of the next packet, 0 if none
    pub fn data_size(&self) -> usize {
        self.queue.front_len().unwrap_or(0)
    }

    /// Take the next packet
    pub fn get_packet(&self) -> Option<QueuedPacket> {
        self.queue.pop()
    }

    /// Copy the next packet's payload into `buf`
    ///
    /// Returns the number of bytes copied; a payload longer than `buf` is
    /// truncated and the rest discarded.
    pub fn read_into(&self, buf: &mut [u8]) -> Option<usize> {
        let packet = self.queue.pop()?;
        let len = packet.payload.len().min(buf.len());
        buf[..len].copy_from_slice(&packet.payload[..len]);
        Some(len)
    }

    /// Take the next packet as text, replacing invalid UTF-8
    pub fn read_text(&self) -> Option<String> {
        self.queue
            .pop()
            .map(|p| String::from_utf8_lossy(&p.payload).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::MAX_DATA_QUEUE;
    use crate::protocol::header::SERIAL_STREAM_MIDI;
    use crate::protocol::WireHeader;
    use bytes::Bytes;

    fn packet(text: &str) -> QueuedPacket {
        QueuedPacket {
            stream: 0,
            kind: PacketKind::Chat,
            header: WireHeader::service(StreamName::truncated("chat"), SERVICE_CHAT_UTF8, 0, 0),
            payload: Bytes::copy_from_slice(text.as_bytes()),
        }
    }

    #[test]
    fn test_data_queue_capacity() {
        let input = DataInput::new(DataKind::chat());
        assert_eq!(input.queue().capacity(), MAX_DATA_QUEUE);
        let midi = DataInput::new(DataKind::Midi { bps_index: 0 });
        assert_eq!(midi.queue().capacity(), MAX_DATA_QUEUE);
    }

    #[test]
    fn test_spec_for_each_kind() {
        let name = StreamName::truncated("x");
        let chat = DataKind::chat().spec(name);
        assert_eq!(chat.protocol, 0x60);
        assert_eq!(chat.service_type, Some(SERVICE_CHAT_UTF8));

        let serial = DataKind::Serial { bps_index: 3 }.spec(name);
        assert_eq!(serial.protocol, 0x23);
        assert_eq!(serial.service_type, None);
        assert_eq!(serial.format_bit, None);

        let midi = DataKind::Midi { bps_index: 3 }.spec(name);
        assert_eq!(midi.protocol, 0x23);
        assert_eq!(midi.format_bit, Some(SERIAL_STREAM_MIDI));
    }

    #[test]
    fn test_unsubscribed_input_not_available() {
        let input = DataInput::new(DataKind::chat());
        input.queue().push(packet("hi")).unwrap();
        assert!(!input.available());
        assert_eq!(input.data_size(), 2);
    }

    #[test]
    fn test_reads_in_order() {
        let input = DataInput::new(DataKind::chat());
        input.queue().push(packet("first")).unwrap();
        input.queue().push(packet("second!")).unwrap();

        assert_eq!(input.data_size(), 5);
        assert_eq!(input.read_text().as_deref(), Some("first"));

        let mut buf = [0u8; 3];
        assert_eq!(input.read_into(&mut buf), Some(3));
        assert_eq!(&buf, b"sec");
        assert_eq!(input.data_size(), 0);
        assert!(input.get_packet().is_none());
    }
}
