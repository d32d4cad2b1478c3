//! Error types for the VBAN transport
//!
//! The packet path itself never returns these: table-full, queue-full and
//! malformed datagrams are handled by dropping and counting. Errors surface
//! from decoding helpers, socket setup and configuration loading.

use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Wire format errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Datagram too short: {0} bytes")]
    TooShort(usize),

    #[error("Bad magic: {0:02X?}")]
    BadMagic([u8; 4]),

    #[error("Payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    #[error("Truncated payload: expected {expected} bytes, got {actual}")]
    TruncatedPayload { expected: usize, actual: usize },

    #[error("Stream name too long: {0} bytes")]
    NameTooLong(usize),
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Packet too large: {0} bytes")]
    PacketTooLarge(usize),

    #[error("Address {0} is not IPv4")]
    NotIpv4(std::net::SocketAddr),
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
