//! Lock-free ring buffer for PCM samples
//!
//! Single-producer single-consumer buffer between the playback task, which
//! pushes decoded samples, and a real-time output callback, which drains
//! them.

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Interleaved i16 samples awaiting output
///
/// Overflows happen on the writer side when output falls behind; underruns
/// are counted each time the callback drains the queue dry.
pub struct RingBuffer {
    queue: ArrayQueue<i16>,
    overflows: AtomicUsize,
    underruns: AtomicUsize,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
            overflows: AtomicUsize::new(0),
            underruns: AtomicUsize::new(0),
        }
    }

    /// Queue one sample; false when full
    pub fn push(&self, sample: i16) -> bool {
        let queued = self.queue.push(sample).is_ok();
        if !queued {
            self.overflows.fetch_add(1, Ordering::Relaxed);
        }
        queued
    }

    /// Queue 16-bit little-endian PCM; returns the number of samples dropped
    pub fn push_pcm(&self, pcm: &[u8]) -> usize {
        pcm.chunks_exact(2)
            .filter(|b| !self.push(i16::from_le_bytes([b[0], b[1]])))
            .count()
    }

    pub fn pop(&self) -> Option<i16> {
        let sample = self.queue.pop();
        if sample.is_none() {
            self.underruns.fetch_add(1, Ordering::Relaxed);
        }
        sample
    }

    /// Fill an output slice, writing silence past the queued data
    pub fn fill(&self, out: &mut [i16]) {
        for slot in out.iter_mut() {
            *slot = self.queue.pop().unwrap_or(0);
        }
        if self.queue.is_empty() {
            self.underruns.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn overflow_count(&self) -> usize {
        self.overflows.load(Ordering::Relaxed)
    }

    pub fn underrun_count(&self) -> usize {
        self.underruns.load(Ordering::Relaxed)
    }

    /// Queued fraction of capacity, 0.0 to 1.0
    pub fn fill_level(&self) -> f32 {
        self.queue.len() as f32 / self.queue.capacity() as f32
    }
}

pub type SharedRingBuffer = Arc<RingBuffer>;

pub fn create_shared_buffer(capacity: usize) -> SharedRingBuffer {
    Arc::new(RingBuffer::new(capacity))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_buffer_basic() {
        let buffer = RingBuffer::new(4);

        assert!(buffer.push(1));
        assert!(buffer.push(-2));
        assert_eq!(buffer.len(), 2);

        assert_eq!(buffer.pop(), Some(1));
        assert_eq!(buffer.pop(), Some(-2));
        assert!(buffer.is_empty());
        assert_eq!(buffer.pop(), None);
        assert_eq!(buffer.underrun_count(), 1);
    }

    #[test]
    fn test_push_pcm_counts_overflow() {
        let buffer = RingBuffer::new(2);
        let pcm: Vec<u8> = [1i16, 2, 3]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();

        assert_eq!(buffer.push_pcm(&pcm), 1);
        assert_eq!(buffer.overflow_count(), 1);
        assert_eq!(buffer.fill_level(), 1.0);
    }

    #[test]
    fn test_fill_pads_with_silence() {
        let buffer = RingBuffer::new(8);
        buffer.push(7);
        buffer.push(8);

        let mut out = [99i16; 4];
        buffer.fill(&mut out);
        assert_eq!(out, [7, 8, 0, 0]);
        assert_eq!(buffer.underrun_count(), 1);
    }
}
