//! Codec selection by `rtpmap`

use std::fmt;
use std::sync::Arc;

use tracing::{info, warn};

use crate::codec::decoder::{PacketDecoder, Passthrough, UnavailableDecoder};
use crate::error::CodecError;
use crate::sdp::SessionDescription;

/// Codec identifier senders put in `rtpmap` for lossless streams
pub const APPLE_LOSSLESS: &str = "AppleLossless";

/// Builds a decoder for one session
pub type DecoderFactory =
    Arc<dyn Fn(&SessionDescription) -> Result<Box<dyn PacketDecoder>, CodecError> + Send + Sync>;

/// Known codecs, matched in registration order
#[derive(Clone, Default)]
pub struct CodecRegistry {
    codecs: Vec<(String, DecoderFactory)>,
}

impl CodecRegistry {
    /// Empty registry: every stream passes through
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in codecs
    pub fn with_defaults() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::new();

        #[cfg(feature = "alac")]
        registry.register(APPLE_LOSSLESS, |description: &SessionDescription| {
            let fmtp = description.fmtp().unwrap_or_default();
            let decoder = crate::codec::decoder::AlacDecoder::from_fmtp(fmtp)?;
            Ok(Box::new(decoder) as Box<dyn PacketDecoder>)
        });

        registry
    }

    /// Register a codec by the name it carries in `rtpmap`
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&SessionDescription) -> Result<Box<dyn PacketDecoder>, CodecError>
            + Send
            + Sync
            + 'static,
    {
        self.codecs.push((name.into(), Arc::new(factory)));
    }

    pub fn names(&self) -> Vec<&str> {
        self.codecs.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Pick the decoder for a session
    ///
    /// A codec whose factory fails yields a decoder that rejects every
    /// packet, so local playback drops them while forwarding continues.
    pub fn select(&self, description: &SessionDescription) -> Box<dyn PacketDecoder> {
        let rtpmap = description.rtpmap().unwrap_or_default();

        let Some((name, factory)) = self
            .codecs
            .iter()
            .find(|(name, _)| rtpmap.contains(name.as_str()))
        else {
            info!("No codec registered for rtpmap '{}', passing through", rtpmap);
            return Box::new(Passthrough);
        };

        match factory(description) {
            Ok(decoder) => {
                info!("Selected {} decoder", name);
                decoder
            }
            Err(e) => {
                warn!("Failed to initialise {} decoder: {}", name, e);
                Box::new(UnavailableDecoder::new(format!("{}: {}", name, e)))
            }
        }
    }
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("codecs", &self.names())
            .finish()
    }
}
