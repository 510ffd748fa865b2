//! # LAN Zone Audio
//!
//! Multi-room audio receiver for the remote-audio streaming protocol.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                           ZONE LEADER NODE                                   │
//! │                                                                              │
//! │   remote client ──TCP──▶ ┌───────────────────────────────────────────┐      │
//! │                          │   Control server (rtsp::server)            │      │
//! │                          │   OPTIONS / ANNOUNCE / SETUP / RECORD ...  │      │
//! │                          └─────────────────────┬─────────────────────┘      │
//! │                                                │ handlers (raop::server)    │
//! │                                                ▼                            │
//! │   remote client ──UDP──▶ ┌───────────────────────────────────────────┐      │
//! │                          │   Session receive loop (rtsp::session)    │      │
//! │                          │   AES-CBC decrypt ─▶ bounded packet queue │      │
//! │                          └─────────────────────┬─────────────────────┘      │
//! │                                                ▼                            │
//! │                          ┌───────────────────────────────────────────┐      │
//! │                          │   ForwardingPlayer (player::forwarding)    │      │
//! │                          │   decode ─▶ volume ─▶ local AudioSink      │      │
//! │                          │   raw packet ─▶ every peer send queue      │      │
//! │                          └──────┬──────────────┬──────────────┬──────┘      │
//! │                                 │              │              │             │
//! │  membership events ──▶ cluster::ForwardingListener adds/removes peers       │
//! └─────────────────────────────────┼──────────────┼──────────────┼─────────────┘
//!                                   │ UDP          │ UDP          │ UDP
//!                                   ▼              ▼              ▼
//!                            ┌────────────┐ ┌────────────┐ ┌────────────┐
//!                            │ Peer node  │ │ Peer node  │ │ Peer node  │
//!                            │ (music)    │ │ (music)    │ │ (music)    │
//!                            └────────────┘ └────────────┘ └────────────┘
//! ```
//!
//! Volume, track metadata and album art follow the audio to every peer as
//! independent `SET_PARAMETER` exchanges on the peer's control port.

pub mod api;
pub mod audio;
pub mod cluster;
pub mod codec;
pub mod config;
pub mod error;
pub mod player;
pub mod raop;
pub mod rtsp;
pub mod sdp;
pub mod store;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    use std::time::Duration;

    /// Protocol version used on outbound requests
    pub const RTSP_VERSION: &str = "RTSP/1.0";

    /// Default control protocol port
    pub const DEFAULT_RTSP_PORT: u16 = 5000;

    /// Default UDP port for inbound audio data
    pub const DEFAULT_DATA_PORT: u16 = 6000;

    /// Local control port advertised during SETUP
    pub const DEFAULT_CONTROL_PORT: u16 = 6001;

    /// Local timing port advertised during SETUP
    pub const DEFAULT_TIMING_PORT: u16 = 6002;

    /// Default HTTP port for the management API
    pub const DEFAULT_API_PORT: u16 = 8080;

    /// Default gossip port
    pub const DEFAULT_CLUSTER_PORT: u16 = 7676;

    /// Capacity of a session's packet queue (producers block when full)
    pub const PACKET_CHANNEL_CAPACITY: usize = 1000;

    /// Datagram read buffer size
    pub const READ_BUFFER_SIZE: usize = 16 * 1024;

    /// Largest control-protocol body accepted (album art included)
    pub const MAX_BODY_SIZE: usize = 8 * 1024 * 1024;

    /// Longest request, status or header line accepted
    pub const MAX_LINE_SIZE: usize = 8 * 1024;

    /// Bytes of RTP framing ahead of the encrypted audio payload
    pub const RTP_HEADER_SIZE: usize = 12;

    /// Output sample rate
    pub const SAMPLE_RATE: u32 = 44_100;

    /// Output channel count
    pub const CHANNELS: u16 = 2;

    /// Latency reported in the RECORD response, in samples
    pub const AUDIO_LATENCY: &str = "2205";

    /// Retries after the first failed attempt to reach a joining peer
    pub const ESTABLISH_RETRIES: usize = 3;

    /// Fixed delay between establishment attempts
    pub const ESTABLISH_RETRY_DELAY: Duration = Duration::from_secs(3);

    /// Ring buffer capacity for device output, in samples
    pub const OUTPUT_BUFFER_SAMPLES: usize = SAMPLE_RATE as usize * CHANNELS as usize;
}
