//! VBAN wire header codec
//!
//! Every datagram starts with a fixed 28-byte header:
//!
//! ```text
//! ┌────────┬───────────┬────────────┬────────────┬────────────┬──────────────┬───────────┐
//! │ "VBAN" │ format_SR │ format_nbs │ format_nbc │ format_bit │ name[16]     │ frame u32 │
//! │ 4 B    │ 1 B       │ 1 B        │ 1 B        │ 1 B        │ NUL padded   │ LE        │
//! └────────┴───────────┴────────────┴────────────┴────────────┴──────────────┴───────────┘
//! ```
//!
//! `format_SR` carries the sub-protocol in bits 7–5 and a protocol specific
//! rate/usage index in bits 4–0. The meaning of the other format bytes
//! depends on the sub-protocol.

use bytes::{Buf, BufMut};
use serde::Serialize;
use std::fmt;

use crate::constants::{HEADER_SIZE, STREAM_NAME_LEN};
use crate::error::ProtocolError;

/// Magic bytes at the start of every VBAN datagram
pub const MAGIC: [u8; 4] = *b"VBAN";

/// Mask for the sub-protocol bits of `format_SR`
pub const PROTOCOL_MASK: u8 = 0xE0;
/// Shift for the sub-protocol bits of `format_SR`
pub const PROTOCOL_SHIFT: u8 = 5;
/// Mask for the rate/usage index bits of `format_SR`
pub const RATE_MASK: u8 = 0x1F;
/// Mask for the datatype bits of `format_bit`
pub const DATATYPE_MASK: u8 = 0x07;
/// Mask for the codec / stream-type bits of `format_bit`
pub const CODEC_MASK: u8 = 0xF0;

/// Audio sample-rate index for 44.1 kHz
pub const RATE_INDEX_44100: u8 = 16;
/// Audio sample-rate index for 48 kHz
pub const RATE_INDEX_48000: u8 = 3;

/// The only audio `format_SR` accepted for queuing (Audio, 44.1 kHz)
pub const ACCEPTED_AUDIO_FORMAT_SR: u8 = RATE_INDEX_44100;
/// The only audio `format_bit` accepted for queuing (INT16, PCM)
pub const ACCEPTED_AUDIO_FORMAT_BIT: u8 = 0x01;

/// Serial `format_bit` stream type for MIDI
pub const SERIAL_STREAM_MIDI: u8 = 0x10;

/// Service type: identification (ping)
pub const SERVICE_IDENTIFICATION: u8 = 0;
/// Service type: UTF-8 chat
pub const SERVICE_CHAT_UTF8: u8 = 1;
/// Service type: real-time packet registration
pub const SERVICE_RT_PACKET_REGISTER: u8 = 32;
/// Service type: real-time packet
pub const SERVICE_RT_PACKET: u8 = 33;

/// Service function (format_nbs): request
pub const SERVICE_FUNCTION_REQUEST: u8 = 0x00;
/// Service function (format_nbs): reply
pub const SERVICE_FUNCTION_REPLY: u8 = 0x80;

/// Audio sample rates by `format_SR` index
pub const SAMPLE_RATES: [u32; 21] = [
    6000, 12000, 24000, 48000, 96000, 192000, 384000, 8000, 16000, 32000, 64000, 128000, 256000,
    512000, 11025, 22050, 44100, 88200, 176400, 352800, 705600,
];

/// Serial / text bit rates by `format_SR` index
pub const BIT_RATES: [u32; 25] = [
    0, 110, 150, 300, 600, 1200, 2400, 4800, 9600, 14400, 19200, 31250, 38400, 57600, 115200,
    128000, 230400, 250000, 256000, 460800, 921600, 1000000, 1500000, 2000000, 3000000,
];

/// Sub-protocol carried in bits 7–5 of `format_SR`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SubProtocol {
    Audio,
    Serial,
    Text,
    Service,
    /// Values 4..=7 are undefined by the protocol
    Reserved(u8),
}

impl SubProtocol {
    /// Decode from the three protocol bits (already shifted down)
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x07 {
            0 => Self::Audio,
            1 => Self::Serial,
            2 => Self::Text,
            3 => Self::Service,
            other => Self::Reserved(other),
        }
    }

    /// Decode from a full `format_SR` byte
    pub fn from_format_sr(format_sr: u8) -> Self {
        Self::from_bits((format_sr & PROTOCOL_MASK) >> PROTOCOL_SHIFT)
    }

    /// The three protocol bits, not shifted
    pub fn bits(self) -> u8 {
        match self {
            Self::Audio => 0,
            Self::Serial => 1,
            Self::Text => 2,
            Self::Service => 3,
            Self::Reserved(b) => b & 0x07,
        }
    }

    /// Protocol bits shifted into `format_SR` position
    pub fn shifted(self) -> u8 {
        self.bits() << PROTOCOL_SHIFT
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Audio => "AUDIO",
            Self::Serial => "SERIAL",
            Self::Text => "TEXT",
            Self::Service => "SERVICE",
            Self::Reserved(_) => "UNDEFINED",
        }
    }
}

/// Audio sample datatype, bits 2–0 of `format_bit`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DataType {
    Byte8,
    Int16,
    Int24,
    Int32,
    Float32,
    Float64,
    Bits12,
    Bits10,
}

impl DataType {
    pub fn from_bits(bits: u8) -> Self {
        match bits & DATATYPE_MASK {
            0 => Self::Byte8,
            1 => Self::Int16,
            2 => Self::Int24,
            3 => Self::Int32,
            4 => Self::Float32,
            5 => Self::Float64,
            6 => Self::Bits12,
            _ => Self::Bits10,
        }
    }

    pub fn bits(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Byte8 => "BYTE8",
            Self::Int16 => "INT16",
            Self::Int24 => "INT24",
            Self::Int32 => "INT32",
            Self::Float32 => "FLOAT32",
            Self::Float64 => "FLOAT64",
            Self::Bits12 => "BITS12",
            Self::Bits10 => "BITS10",
        }
    }
}

/// Audio codec, bits 7–4 of `format_bit`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Codec {
    Pcm,
    Vbca,
    Vbcv,
    Undefined(u8),
}

impl Codec {
    pub fn from_format_bit(format_bit: u8) -> Self {
        match (format_bit & CODEC_MASK) >> 4 {
            0 => Self::Pcm,
            1 => Self::Vbca,
            2 => Self::Vbcv,
            other => Self::Undefined(other),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Pcm => "PCM",
            Self::Vbca => "VBCA",
            Self::Vbcv => "VBCV",
            Self::Undefined(_) => "UNDEF",
        }
    }
}

/// Fixed 16-byte, NUL padded stream name
///
/// Bytes after the first NUL are always zero, so two names compare equal
/// exactly when their visible text is equal.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StreamName([u8; STREAM_NAME_LEN]);

impl StreamName {
    /// Build a name, failing if it does not fit in 16 bytes
    pub fn new(name: &str) -> Result<Self, ProtocolError> {
        let bytes = name.as_bytes();
        if bytes.len() > STREAM_NAME_LEN {
            return Err(ProtocolError::NameTooLong(bytes.len()));
        }
        Ok(Self::from_raw(bytes))
    }

    /// Build a name, silently truncating to 16 bytes
    pub fn truncated(name: &str) -> Self {
        Self::from_raw(name.as_bytes())
    }

    /// Build from raw wire bytes, normalising everything after the first NUL
    pub fn from_raw(raw: &[u8]) -> Self {
        let mut out = [0u8; STREAM_NAME_LEN];
        for (dst, &src) in out.iter_mut().zip(raw.iter()) {
            if src == 0 {
                break;
            }
            *dst = src;
        }
        Self(out)
    }

    pub fn as_bytes(&self) -> &[u8; STREAM_NAME_LEN] {
        &self.0
    }

    /// Visible length (bytes before the first NUL)
    pub fn len(&self) -> usize {
        self.0.iter().position(|&b| b == 0).unwrap_or(STREAM_NAME_LEN)
    }

    pub fn is_empty(&self) -> bool {
        self.0[0] == 0
    }

    /// Lossy UTF-8 view of the name
    pub fn as_string(&self) -> String {
        String::from_utf8_lossy(&self.0[..self.len()]).into_owned()
    }
}

impl fmt::Debug for StreamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StreamName({:?})", self.as_string())
    }
}

impl fmt::Display for StreamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_string())
    }
}

impl Serialize for StreamName {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_string())
    }
}

/// Decoded VBAN header (magic already validated)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WireHeader {
    pub format_sr: u8,
    pub format_nbs: u8,
    pub format_nbc: u8,
    pub format_bit: u8,
    pub stream_name: StreamName,
    pub frame: u32,
}

impl WireHeader {
    /// Header for an audio packet in the accepted profile (44.1 kHz, INT16, PCM)
    ///
    /// `samples` and `channels` must be in 1..=256.
    pub fn audio(stream_name: StreamName, samples: usize, channels: usize, frame: u32) -> Self {
        debug_assert!((1..=256).contains(&samples));
        debug_assert!((1..=256).contains(&channels));
        Self {
            format_sr: ACCEPTED_AUDIO_FORMAT_SR,
            format_nbs: (samples - 1) as u8,
            format_nbc: (channels - 1) as u8,
            format_bit: ACCEPTED_AUDIO_FORMAT_BIT,
            stream_name,
            frame,
        }
    }

    /// Header for a service packet
    pub fn service(stream_name: StreamName, service_type: u8, function: u8, frame: u32) -> Self {
        Self {
            format_sr: SubProtocol::Service.shifted(),
            format_nbs: function,
            format_nbc: service_type,
            format_bit: 0,
            stream_name,
            frame,
        }
    }

    /// Header for a serial packet, optionally tagged as MIDI
    pub fn serial(stream_name: StreamName, bps_index: u8, midi: bool, frame: u32) -> Self {
        Self {
            format_sr: SubProtocol::Serial.shifted() | (bps_index & RATE_MASK),
            format_nbs: 0,
            format_nbc: 0,
            format_bit: if midi { SERIAL_STREAM_MIDI } else { 0 },
            stream_name,
            frame,
        }
    }

    /// Decode the header from the start of a datagram
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < HEADER_SIZE {
            return Err(ProtocolError::TooShort(data.len()));
        }
        let mut buf = &data[..HEADER_SIZE];

        let mut magic = [0u8; 4];
        buf.copy_to_slice(&mut magic);
        if magic != MAGIC {
            return Err(ProtocolError::BadMagic(magic));
        }

        let format_sr = buf.get_u8();
        let format_nbs = buf.get_u8();
        let format_nbc = buf.get_u8();
        let format_bit = buf.get_u8();
        let mut name = [0u8; STREAM_NAME_LEN];
        buf.copy_to_slice(&mut name);
        let frame = buf.get_u32_le();

        Ok(Self {
            format_sr,
            format_nbs,
            format_nbc,
            format_bit,
            stream_name: StreamName::from_raw(&name),
            frame,
        })
    }

    /// Append the 28-byte wire form to `buf`
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_slice(&MAGIC);
        buf.put_u8(self.format_sr);
        buf.put_u8(self.format_nbs);
        buf.put_u8(self.format_nbc);
        buf.put_u8(self.format_bit);
        buf.put_slice(self.stream_name.as_bytes());
        buf.put_u32_le(self.frame);
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        let mut cursor = &mut out[..];
        self.encode(&mut cursor);
        out
    }

    pub fn sub_protocol(&self) -> SubProtocol {
        SubProtocol::from_format_sr(self.format_sr)
    }

    /// Sub-protocol bits in place (`format_SR & 0xE0`)
    pub fn protocol_bits(&self) -> u8 {
        self.format_sr & PROTOCOL_MASK
    }

    pub fn rate_index(&self) -> u8 {
        self.format_sr & RATE_MASK
    }

    /// Samples per channel in an audio packet (1..=256)
    pub fn samples(&self) -> usize {
        self.format_nbs as usize + 1
    }

    /// Channels in an audio packet (1..=256)
    pub fn channels(&self) -> usize {
        self.format_nbc as usize + 1
    }

    pub fn data_type(&self) -> DataType {
        DataType::from_bits(self.format_bit)
    }

    pub fn codec(&self) -> Codec {
        Codec::from_format_bit(self.format_bit)
    }

    /// Service type byte (`format_nbc`) of a service packet
    pub fn service_type(&self) -> u8 {
        self.format_nbc
    }

    /// True for a service packet whose function is a request rather than a reply
    pub fn is_request(&self) -> bool {
        self.format_nbs & SERVICE_FUNCTION_REPLY == 0
    }

    /// Audio sample rate in Hz, if this is an audio header with a known index
    pub fn sample_rate(&self) -> Option<u32> {
        match self.sub_protocol() {
            SubProtocol::Audio => SAMPLE_RATES.get(self.rate_index() as usize).copied(),
            _ => None,
        }
    }

    /// Serial / text bit rate in bits per second, if known
    pub fn bit_rate(&self) -> Option<u32> {
        match self.sub_protocol() {
            SubProtocol::Serial | SubProtocol::Text => {
                BIT_RATES.get(self.rate_index() as usize).copied()
            }
            _ => None,
        }
    }

    /// Whether this is an audio header in the accepted (44.1 kHz, INT16, PCM) profile
    pub fn is_accepted_audio(&self) -> bool {
        self.format_sr == ACCEPTED_AUDIO_FORMAT_SR && self.format_bit == ACCEPTED_AUDIO_FORMAT_BIT
    }

    /// Payload length implied by an INT16 audio header
    pub fn audio_payload_len(&self) -> usize {
        self.samples() * self.channels() * crate::constants::BYTES_PER_SAMPLE
    }
}

impl fmt::Display for WireHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} sr=0x{:02X} samples={} chans={} bit=0x{:02X} '{}' frame={}",
            self.sub_protocol().name(),
            self.format_sr,
            self.samples(),
            self.channels(),
            self.format_bit,
            self.stream_name,
            self.frame
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> StreamName {
        StreamName::new(s).unwrap()
    }

    #[test]
    fn test_header_layout_is_bit_exact() {
        let hdr = WireHeader::audio(name("Stream1"), 128, 2, 0x0102_0304);
        let bytes = hdr.to_bytes();

        assert_eq!(&bytes[0..4], b"VBAN");
        assert_eq!(bytes[4], 0x10);
        assert_eq!(bytes[5], 127);
        assert_eq!(bytes[6], 1);
        assert_eq!(bytes[7], 0x01);
        assert_eq!(&bytes[8..15], b"Stream1");
        assert!(bytes[15..24].iter().all(|&b| b == 0));
        assert_eq!(&bytes[24..28], &[0x04, 0x03, 0x02, 0x01]);

        let decoded = WireHeader::decode(&bytes).unwrap();
        assert_eq!(decoded, hdr);
    }

    #[test]
    fn test_decode_rejects_bad_magic_and_short_input() {
        let mut bytes = WireHeader::default().to_bytes();
        bytes[0] = b'X';
        assert!(matches!(
            WireHeader::decode(&bytes),
            Err(ProtocolError::BadMagic(_))
        ));
        assert_eq!(
            WireHeader::decode(&bytes[..10]),
            Err(ProtocolError::TooShort(10))
        );
    }

    #[test]
    fn test_stream_name_normalises_trailing_garbage() {
        let a = StreamName::from_raw(b"abc\0xyz");
        let b = StreamName::new("abc").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 3);
        assert_eq!(a.to_string(), "abc");
    }

    #[test]
    fn test_stream_name_length_limit() {
        assert!(StreamName::new("0123456789abcdef").is_ok());
        assert_eq!(
            StreamName::new("0123456789abcdefg"),
            Err(ProtocolError::NameTooLong(17))
        );
        assert_eq!(StreamName::truncated("0123456789abcdefg").len(), 16);
    }

    #[test]
    fn test_field_accessors() {
        let hdr = WireHeader::audio(name("a"), 89, 6, 7);
        assert_eq!(hdr.sub_protocol(), SubProtocol::Audio);
        assert_eq!(hdr.sample_rate(), Some(44100));
        assert_eq!(hdr.data_type(), DataType::Int16);
        assert_eq!(hdr.codec(), Codec::Pcm);
        assert_eq!(hdr.audio_payload_len(), 89 * 6 * 2);
        assert!(hdr.is_accepted_audio());

        let svc = WireHeader::service(name("chat"), SERVICE_CHAT_UTF8, SERVICE_FUNCTION_REPLY, 1);
        assert_eq!(svc.sub_protocol(), SubProtocol::Service);
        assert_eq!(svc.format_sr, 0x60);
        assert!(!svc.is_request());

        let midi = WireHeader::serial(name("midi"), 11, true, 0);
        assert_eq!(midi.sub_protocol(), SubProtocol::Serial);
        assert_eq!(midi.bit_rate(), Some(31250));
    }
}
