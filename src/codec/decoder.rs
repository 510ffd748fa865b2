//! Packet decoders
//!
//! A decoder turns one decrypted audio payload into interleaved 16-bit
//! little-endian PCM. Decoders are stateful and owned by a single playback
//! task.

use crate::error::CodecError;

/// Decode one packet into PCM bytes
pub trait PacketDecoder: Send {
    fn decode(&mut self, packet: &[u8]) -> Result<Vec<u8>, CodecError>;
}

impl<F> PacketDecoder for F
where
    F: FnMut(&[u8]) -> Result<Vec<u8>, CodecError> + Send,
{
    fn decode(&mut self, packet: &[u8]) -> Result<Vec<u8>, CodecError> {
        self(packet)
    }
}

/// Identity decoder for streams that already carry PCM
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl PacketDecoder for Passthrough {
    fn decode(&mut self, packet: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(packet.to_vec())
    }
}

/// Stand-in for a codec that could not be initialised
#[derive(Debug, Clone)]
pub struct UnavailableDecoder {
    reason: String,
}

impl UnavailableDecoder {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl PacketDecoder for UnavailableDecoder {
    fn decode(&mut self, _packet: &[u8]) -> Result<Vec<u8>, CodecError> {
        Err(CodecError::UnsupportedCodec(self.reason.clone()))
    }
}

/// Apple Lossless decoder wrapper
#[cfg(feature = "alac")]
pub struct AlacDecoder {
    decoder: alac::Decoder,
    /// Decoding buffer (reused to avoid allocations)
    decode_buffer: Vec<i16>,
    /// Packets decoded
    frames_decoded: u64,
    /// Packets rejected by the decoder
    frames_failed: u64,
}

#[cfg(feature = "alac")]
impl AlacDecoder {
    /// Create a decoder from the `fmtp` parameters of a session description
    pub fn from_fmtp(fmtp: &str) -> Result<Self, CodecError> {
        let config = alac::StreamInfo::from_sdp_format_parameters(fmtp)
            .map_err(|e| CodecError::DecoderInit(format!("{:?}", e)))?;
        let decode_buffer = vec![0i16; config.max_samples_per_packet() as usize];

        Ok(Self {
            decoder: alac::Decoder::new(config),
            decode_buffer,
            frames_decoded: 0,
            frames_failed: 0,
        })
    }

    /// Get statistics
    pub fn stats(&self) -> DecoderStats {
        DecoderStats {
            frames_decoded: self.frames_decoded,
            frames_failed: self.frames_failed,
        }
    }
}

#[cfg(feature = "alac")]
impl PacketDecoder for AlacDecoder {
    fn decode(&mut self, packet: &[u8]) -> Result<Vec<u8>, CodecError> {
        let samples = match self.decoder.decode_packet(packet, &mut self.decode_buffer) {
            Ok(samples) => samples,
            Err(e) => {
                self.frames_failed += 1;
                return Err(CodecError::DecodingFailed(format!("{:?}", e)));
            }
        };
        self.frames_decoded += 1;

        let mut pcm = Vec::with_capacity(samples.len() * 2);
        for sample in samples {
            pcm.extend_from_slice(&sample.to_le_bytes());
        }
        Ok(pcm)
    }
}

/// Decoder statistics
#[cfg(feature = "alac")]
#[derive(Debug, Clone)]
pub struct DecoderStats {
    pub frames_decoded: u64,
    pub frames_failed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passthrough() {
        let mut decoder = Passthrough;
        assert_eq!(decoder.decode(&[1, 2, 3]).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_closure_decoder() {
        let mut calls = 0;
        let mut decoder = |packet: &[u8]| -> Result<Vec<u8>, CodecError> {
            calls += 1;
            Ok(packet.iter().map(|b| b.wrapping_add(1)).collect())
        };
        assert_eq!(PacketDecoder::decode(&mut decoder, &[0, 1]).unwrap(), vec![1, 2]);
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_unavailable_always_errors() {
        let mut decoder = UnavailableDecoder::new("AppleLossless");
        assert!(matches!(
            decoder.decode(&[0; 4]),
            Err(CodecError::UnsupportedCodec(_))
        ));
    }

    #[cfg(feature = "alac")]
    #[test]
    fn test_alac_garbage_is_error() {
        let mut decoder = AlacDecoder::from_fmtp("96 352 0 16 40 10 14 2 255 0 0 44100").unwrap();
        let _ = decoder.decode(&[0xff; 8]);
        let stats = decoder.stats();
        assert_eq!(stats.frames_decoded + stats.frames_failed, 1);
    }
}
