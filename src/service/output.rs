//! Packet-oriented output for service, chat, serial and MIDI streams

use bytes::Bytes;
use std::net::Ipv4Addr;

use crate::constants::MAX_PAYLOAD_SIZE;
use crate::protocol::header::{SERVICE_CHAT_UTF8, SERVICE_FUNCTION_REQUEST};
use crate::protocol::{classify, PacketKind, StreamName, WireHeader};
use crate::transport::{Clock, DatagramSocket, PacketQueue, QueuedPacket, Transport};

/// Send counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DataOutputStats {
    pub packets: u64,
    pub bytes: u64,
    /// Sends refused because the payload was empty or too large
    pub rejected: u64,
    /// Sends refused because the queue was full
    pub dropped: u64,
}

/// Producer of one non-audio stream
pub struct DataOutput {
    name: StreamName,
    template: WireHeader,
    queue: PacketQueue,
    stream: Option<usize>,
    frame: u32,
    stats: DataOutputStats,
}

impl DataOutput {
    /// Service stream of the given type (`format_nbc`)
    pub fn service(name: StreamName, service_type: u8) -> Self {
        Self::with_template(WireHeader::service(
            name,
            service_type,
            SERVICE_FUNCTION_REQUEST,
            0,
        ))
    }

    /// UTF-8 chat stream
    pub fn chat(name: StreamName) -> Self {
        Self::service(name, SERVICE_CHAT_UTF8)
    }

    /// Serial stream, optionally tagged as MIDI
    pub fn serial(name: StreamName, bps_index: u8, midi: bool) -> Self {
        Self::with_template(WireHeader::serial(name, bps_index, midi, 0))
    }

    fn with_template(template: WireHeader) -> Self {
        Self {
            name: template.stream_name,
            queue: PacketQueue::for_kind(classify(&template)),
            template,
            stream: None,
            frame: 0,
            stats: DataOutputStats::default(),
        }
    }

    pub fn name(&self) -> StreamName {
        self.name
    }

    pub fn kind(&self) -> PacketKind {
        classify(&self.template)
    }

    pub fn queue(&self) -> &PacketQueue {
        &self.queue
    }

    pub fn stream(&self) -> Option<usize> {
        self.stream
    }

    /// Register with the transport; the unspecified address broadcasts
    pub fn register<S: DatagramSocket, C: Clock>(
        &mut self,
        transport: &mut Transport<S, C>,
        target: Ipv4Addr,
    ) -> Option<usize> {
        if self.stream.is_some() {
            return self.stream;
        }
        self.stream = transport.register_output(
            self.name,
            self.template.format_sr,
            self.template.format_nbc,
            target,
            &self.queue,
        );
        if self.stream.is_none() {
            tracing::warn!("No free output stream slot for '{}'", self.name);
        }
        self.stream
    }

    pub fn unregister<S: DatagramSocket, C: Clock>(&mut self, transport: &mut Transport<S, C>) {
        if let Some(stream) = self.stream.take() {
            transport.unregister_output(stream);
        }
        self.queue.clear();
    }

    /// Queue one packet carrying `data`
    ///
    /// Refuses empty payloads, payloads over the datagram limit and sends
    /// that find the queue full.
    pub fn send(&mut self, data: &[u8]) -> bool {
        if data.is_empty() || data.len() > MAX_PAYLOAD_SIZE {
            self.stats.rejected += 1;
            tracing::debug!(
                "Refusing {} byte packet on '{}' (limit {})",
                data.len(),
                self.name,
                MAX_PAYLOAD_SIZE
            );
            return false;
        }

        let packet = QueuedPacket {
            stream: self.stream.unwrap_or_default(),
            kind: classify(&self.template),
            header: WireHeader {
                frame: self.frame,
                ..self.template
            },
            payload: Bytes::copy_from_slice(data),
        };
        if self.queue.push(packet).is_err() {
            self.stats.dropped += 1;
            tracing::trace!("Output '{}' queue full, packet dropped", self.name);
            return false;
        }
        self.frame = self.frame.wrapping_add(1);
        self.stats.packets += 1;
        self.stats.bytes += data.len() as u64;
        true
    }

    /// Queue `text`, cut at a character boundary if it does not fit
    pub fn send_text(&mut self, text: &str) -> bool {
        let mut end = text.len().min(MAX_PAYLOAD_SIZE);
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        self.send(&text.as_bytes()[..end])
    }

    pub fn stats(&self) -> DataOutputStats {
        self.stats
    }
}
