//! VBAN wire protocol: header codec, packet classification and the
//! identification payload used for host discovery.

pub mod classify;
pub mod header;
pub mod ping;

pub use classify::{classify, classify_bytes, PacketKind};
pub use header::{Codec, DataType, StreamName, SubProtocol, WireHeader};
pub use ping::PingPayload;
