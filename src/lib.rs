//! # VBAN Transport
//!
//! Directory-based VBAN transport bridging fixed-block audio pipelines and a
//! lossy UDP network.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                         Transport::poll (one tick)                       │
//! │                                                                          │
//! │   socket ──► decode/classify ──► host directory ──► stream directory     │
//! │                    │                  (ping)             │               │
//! │                    ▼                                     ▼               │
//! │              discovery replies                  subscription matching    │
//! │                                                          │               │
//! │                                                          ▼               │
//! │                                               add_packet_to_queue        │
//! │                                                          │               │
//! │   socket ◄── output multiplexer ◄── output queues        │ (weak ref)    │
//! │                      ▲                                   ▼               │
//! │   every housekeeping interval: age streams, sweep subscriptions,         │
//! │                                ping unnamed hosts                        │
//! └──────────────────────┼───────────────────────────────────┼───────────────┘
//!                        │                                   │
//!            ┌───────────┴───────────┐           ┌───────────┴───────────┐
//!            │ NetOutput / DataOutput│           │ NetInput / DataInput  │
//!            │ (own output queues)   │           │ (own input queues)    │
//!            └───────────────────────┘           └───────────────────────┘
//! ```

pub mod audio;
pub mod config;
pub mod directory;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod ui;

pub use error::{Error, Result};
pub use transport::Transport;

/// Application-wide constants
pub mod constants {
    /// Default VBAN UDP port
    pub const VBAN_UDP_PORT: u16 = 6980;

    /// Default port for the status HTTP server
    pub const DEFAULT_HTTP_PORT: u16 = 8080;

    /// Size of the VBAN header
    pub const HEADER_SIZE: usize = 28;

    /// Largest datagram sent or accepted
    pub const MAX_DATAGRAM_SIZE: usize = 1464;

    /// Largest payload after the header
    pub const MAX_PAYLOAD_SIZE: usize = MAX_DATAGRAM_SIZE - HEADER_SIZE;

    /// Stream name field width
    pub const STREAM_NAME_LEN: usize = 16;

    /// Samples per channel in one audio block
    pub const AUDIO_BLOCK_SAMPLES: usize = 128;

    /// INT16 samples
    pub const BYTES_PER_SAMPLE: usize = 2;

    /// Most channels carried by one input or output
    pub const MAX_CHANNELS: usize = 8;

    /// Stream slots per direction
    pub const MAX_STREAMS: usize = 8;

    /// Host directory slots
    pub const MAX_HOSTS: usize = 8;

    /// Subscription slots
    pub const MAX_SUBSCRIPTIONS: usize = 8;

    /// Packets held by an audio queue
    pub const MAX_AUDIO_QUEUE: usize = 12;

    /// Packets held by a service/serial queue
    pub const MAX_DATA_QUEUE: usize = 32;

    /// Housekeeping period
    pub const HOUSEKEEPING_INTERVAL_MS: u64 = 500;

    /// Idle time before an inbound stream is marked inactive
    pub const STALE_STREAM_MS: u64 = 3000;

    /// Idle time before an inactive stream slot may be reclaimed
    pub const DEAD_STREAM_MS: u64 = 6000;

    /// Minimum gap between pings to the same unnamed host
    pub const PING_RETRY_MS: u64 = 4000;
}
