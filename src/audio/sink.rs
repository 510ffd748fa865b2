//! PCM output sinks

use std::sync::Arc;

use parking_lot::Mutex;

use crate::audio::buffer::SharedRingBuffer;
use crate::error::AudioError;

/// Destination for decoded 16-bit little-endian PCM
pub trait AudioSink: Send {
    fn write(&mut self, pcm: &[u8]) -> Result<(), AudioError>;
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl AudioSink for NullSink {
    fn write(&mut self, _pcm: &[u8]) -> Result<(), AudioError> {
        Ok(())
    }
}

/// Collects written bytes in memory
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    data: Arc<Mutex<Vec<u8>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything written so far
    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.lock().is_empty()
    }
}

impl AudioSink for MemorySink {
    fn write(&mut self, pcm: &[u8]) -> Result<(), AudioError> {
        self.data.lock().extend_from_slice(pcm);
        Ok(())
    }
}

/// Feeds a ring buffer drained by an output callback
pub struct RingBufferSink {
    buffer: SharedRingBuffer,
}

impl RingBufferSink {
    pub fn new(buffer: SharedRingBuffer) -> Self {
        Self { buffer }
    }
}

impl AudioSink for RingBufferSink {
    fn write(&mut self, pcm: &[u8]) -> Result<(), AudioError> {
        if self.buffer.push_pcm(pcm) > 0 {
            return Err(AudioError::BufferOverflow);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::create_shared_buffer;

    #[test]
    fn test_memory_sink_shares_contents() {
        let sink = MemorySink::new();
        let mut writer: Box<dyn AudioSink> = Box::new(sink.clone());
        writer.write(&[1, 2]).unwrap();
        writer.write(&[3]).unwrap();
        assert_eq!(sink.contents(), vec![1, 2, 3]);
    }

    #[test]
    fn test_ring_buffer_sink_reports_overflow() {
        let buffer = create_shared_buffer(2);
        let mut sink = RingBufferSink::new(buffer.clone());
        sink.write(&[1, 0, 2, 0]).unwrap();
        assert!(matches!(sink.write(&[3, 0]), Err(AudioError::BufferOverflow)));
        assert_eq!(buffer.pop(), Some(1));
    }
}
