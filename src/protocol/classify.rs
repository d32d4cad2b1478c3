//! Incoming packet triage
//!
//! The classifier is a strict whitelist: an audio packet outside the accepted
//! (rate, datatype, codec) profile is `NotConsumed`, not `Audio`.

use serde::Serialize;

use super::header::{
    SubProtocol, WireHeader, SERIAL_STREAM_MIDI, SERVICE_CHAT_UTF8, SERVICE_IDENTIFICATION,
};

/// Kind of an incoming (or queued) packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PacketKind {
    NotConsumed,
    Audio,
    Midi,
    Serial,
    Text,
    Service,
    Ping,
    Chat,
}

impl PacketKind {
    /// Whether packets of this kind may own a stream slot and be queued
    pub fn is_queueable(self) -> bool {
        matches!(
            self,
            Self::Audio | Self::Midi | Self::Serial | Self::Service | Self::Chat
        )
    }

    pub fn is_audio(self) -> bool {
        self == Self::Audio
    }
}

/// Classify a decoded header
pub fn classify(hdr: &WireHeader) -> PacketKind {
    match hdr.sub_protocol() {
        SubProtocol::Audio => {
            if hdr.is_accepted_audio() {
                PacketKind::Audio
            } else {
                PacketKind::NotConsumed
            }
        }
        SubProtocol::Serial => {
            if hdr.format_bit == SERIAL_STREAM_MIDI {
                PacketKind::Midi
            } else {
                PacketKind::Serial
            }
        }
        SubProtocol::Text => PacketKind::Text,
        SubProtocol::Service => match hdr.service_type() {
            SERVICE_IDENTIFICATION => PacketKind::Ping,
            SERVICE_CHAT_UTF8 => PacketKind::Chat,
            _ => PacketKind::Service,
        },
        SubProtocol::Reserved(_) => PacketKind::NotConsumed,
    }
}

/// Classify raw datagram bytes; anything that fails header decoding is `NotConsumed`
pub fn classify_bytes(data: &[u8]) -> PacketKind {
    match WireHeader::decode(data) {
        Ok(hdr) => classify(&hdr),
        Err(_) => PacketKind::NotConsumed,
    }
}
