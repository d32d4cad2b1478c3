//! Service/Identification ("ping") payload
//!
//! Fixed 676-byte little-endian layout following the header. Every ping,
//! request or reply, carries the sender's identity, which is how hostnames
//! get attached to addresses in the host directory.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::ProtocolError;

/// Size of the identification payload in bytes
pub const PING_PAYLOAD_SIZE: usize = 676;

/// Device type bits
pub mod device_type {
    pub const RECEPTOR: u32 = 0x0000_0001;
    pub const TRANSMITTER: u32 = 0x0000_0002;
    pub const RECEPTOR_SPOT: u32 = 0x0000_0004;
    pub const TRANSMITTER_SPOT: u32 = 0x0000_0008;
    pub const VIRTUAL_DEVICE: u32 = 0x0000_0010;
    pub const VIRTUAL_MIXER: u32 = 0x0000_0020;
    pub const MATRIX: u32 = 0x0000_0040;
    pub const DAW: u32 = 0x0000_0080;
    pub const SERVER: u32 = 0x0100_0000;
}

/// Supported sub-protocol feature bits
pub mod feature {
    pub const AUDIO: u32 = 0x0000_0001;
    pub const AOIP: u32 = 0x0000_0002;
    pub const VOIP: u32 = 0x0000_0004;
    pub const SERIAL: u32 = 0x0000_0100;
    pub const MIDI: u32 = 0x0000_0300;
    pub const FRAME: u32 = 0x0000_1000;
    pub const TXT: u32 = 0x0001_0000;
}

const POSITION_LEN: usize = 8;
const LANG_LEN: usize = 8;
const RESERVED_LEN: usize = 8;
const RESERVED_EX_LEN: usize = 64;
const DISTANT_IP_LEN: usize = 32;
const NAME_LEN: usize = 64;
const LONG_NAME_LEN: usize = 128;

/// Decoded identification payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingPayload {
    pub device_type: u32,
    pub features: u32,
    pub features_ex: u32,
    pub preferred_rate: u32,
    pub min_rate: u32,
    pub max_rate: u32,
    /// 24-bit colour, stored BGR by Voicemeeter
    pub color_rgb: u32,
    pub version: [u8; 4],
    pub gps_position: String,
    pub user_position: String,
    pub language: String,
    pub distant_ip: String,
    pub distant_port: u16,
    pub device_name: String,
    pub manufacturer_name: String,
    pub application_name: String,
    pub host_name: String,
    pub user_name: String,
    pub user_comment: String,
}

impl Default for PingPayload {
    fn default() -> Self {
        Self {
            device_type: device_type::SERVER,
            features: feature::AUDIO,
            features_ex: 0,
            preferred_rate: 44100,
            min_rate: 44100,
            max_rate: 44100,
            color_rgb: 0x0000C0,
            version: version_bytes(env!("CARGO_PKG_VERSION")),
            gps_position: String::new(),
            user_position: String::new(),
            language: "EN".to_string(),
            distant_ip: String::new(),
            distant_port: 0,
            device_name: "vban-transport".to_string(),
            manufacturer_name: String::new(),
            application_name: "vban-transport".to_string(),
            host_name: String::new(),
            user_name: String::new(),
            user_comment: String::new(),
        }
    }
}

impl PingPayload {
    /// Encode into a fresh buffer of exactly `PING_PAYLOAD_SIZE` bytes
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(PING_PAYLOAD_SIZE);
        self.encode_into(&mut buf);
        buf
    }

    pub fn encode_into<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.device_type);
        buf.put_u32_le(self.features);
        buf.put_u32_le(self.features_ex);
        buf.put_u32_le(self.preferred_rate);
        buf.put_u32_le(self.min_rate);
        buf.put_u32_le(self.max_rate);
        buf.put_u32_le(self.color_rgb);
        buf.put_slice(&self.version);
        put_fixed_str(buf, &self.gps_position, POSITION_LEN);
        put_fixed_str(buf, &self.user_position, POSITION_LEN);
        put_fixed_str(buf, &self.language, LANG_LEN);
        buf.put_bytes(0, RESERVED_LEN + RESERVED_EX_LEN);
        put_fixed_str(buf, &self.distant_ip, DISTANT_IP_LEN);
        buf.put_u16_le(self.distant_port);
        buf.put_u16_le(0);
        put_fixed_str(buf, &self.device_name, NAME_LEN);
        put_fixed_str(buf, &self.manufacturer_name, NAME_LEN);
        put_fixed_str(buf, &self.application_name, NAME_LEN);
        put_fixed_str(buf, &self.host_name, NAME_LEN);
        put_fixed_str(buf, &self.user_name, LONG_NAME_LEN);
        put_fixed_str(buf, &self.user_comment, LONG_NAME_LEN);
    }

    /// Decode from the bytes following the header
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < PING_PAYLOAD_SIZE {
            return Err(ProtocolError::TruncatedPayload {
                expected: PING_PAYLOAD_SIZE,
                actual: data.len(),
            });
        }
        let mut buf = &data[..PING_PAYLOAD_SIZE];

        let device_type = buf.get_u32_le();
        let features = buf.get_u32_le();
        let features_ex = buf.get_u32_le();
        let preferred_rate = buf.get_u32_le();
        let min_rate = buf.get_u32_le();
        let max_rate = buf.get_u32_le();
        let color_rgb = buf.get_u32_le();
        let mut version = [0u8; 4];
        buf.copy_to_slice(&mut version);
        let gps_position = get_fixed_str(&mut buf, POSITION_LEN);
        let user_position = get_fixed_str(&mut buf, POSITION_LEN);
        let language = get_fixed_str(&mut buf, LANG_LEN);
        buf.advance(RESERVED_LEN + RESERVED_EX_LEN);
        let distant_ip = get_fixed_str(&mut buf, DISTANT_IP_LEN);
        let distant_port = buf.get_u16_le();
        buf.advance(2);
        let device_name = get_fixed_str(&mut buf, NAME_LEN);
        let manufacturer_name = get_fixed_str(&mut buf, NAME_LEN);
        let application_name = get_fixed_str(&mut buf, NAME_LEN);
        let host_name = get_fixed_str(&mut buf, NAME_LEN);
        let user_name = get_fixed_str(&mut buf, LONG_NAME_LEN);
        let user_comment = get_fixed_str(&mut buf, LONG_NAME_LEN);

        Ok(Self {
            device_type,
            features,
            features_ex,
            preferred_rate,
            min_rate,
            max_rate,
            color_rgb,
            version,
            gps_position,
            user_position,
            language,
            distant_ip,
            distant_port,
            device_name,
            manufacturer_name,
            application_name,
            host_name,
            user_name,
            user_comment,
        })
    }

    /// Version as dotted text, most significant byte first
    pub fn version_string(&self) -> String {
        format!(
            "{}.{}.{}.{}",
            self.version[3], self.version[2], self.version[1], self.version[0]
        )
    }
}

/// Pack a "major.minor.patch" version into the 4-byte field
fn version_bytes(version: &str) -> [u8; 4] {
    let mut parts = version
        .split('.')
        .map(|p| p.parse::<u8>().unwrap_or(0));
    let major = parts.next().unwrap_or(0);
    let minor = parts.next().unwrap_or(0);
    let patch = parts.next().unwrap_or(0);
    [0, patch, minor, major]
}

/// Write `s` into a fixed-width NUL padded field, truncating on a char boundary
fn put_fixed_str<B: BufMut>(buf: &mut B, s: &str, width: usize) {
    let mut end = s.len().min(width);
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    buf.put_slice(&s.as_bytes()[..end]);
    buf.put_bytes(0, width - end);
}

fn get_fixed_str(buf: &mut &[u8], width: usize) -> String {
    let field = &buf[..width];
    let len = field.iter().position(|&b| b == 0).unwrap_or(width);
    let s = String::from_utf8_lossy(&field[..len]).into_owned();
    buf.advance(width);
    s
}
