//! Audio decode
//!
//! The decoder for a session is chosen once, when playback starts, from the
//! `rtpmap` attribute of its description. Unknown codecs pass through.

pub mod decoder;
pub mod registry;

pub use decoder::{PacketDecoder, Passthrough, UnavailableDecoder};
pub use registry::{CodecRegistry, DecoderFactory, APPLE_LOSSLESS};

#[cfg(feature = "alac")]
pub use decoder::AlacDecoder;
