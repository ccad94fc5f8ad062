//! Lock-free sample queue between the writer and the device callback
//!
//! The event thread decodes written bytes into interleaved `f32` samples and
//! pushes them; the cpal callback pops them without blocking.

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::format::SampleEncoding;

/// Bounded queue of interleaved samples
pub struct SampleQueue {
    queue: ArrayQueue<f32>,
    overflow_count: AtomicUsize,
    underrun_count: AtomicUsize,
}

impl SampleQueue {
    /// Create a queue holding up to `capacity` samples
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            overflow_count: AtomicUsize::new(0),
            underrun_count: AtomicUsize::new(0),
        }
    }

    /// Push samples; returns how many fit. Samples that do not fit are
    /// dropped and counted as overflow.
    pub fn push_samples(&self, samples: &[f32]) -> usize {
        for (i, sample) in samples.iter().enumerate() {
            if self.queue.push(*sample).is_err() {
                self.overflow_count.fetch_add(samples.len() - i, Ordering::Relaxed);
                return i;
            }
        }
        samples.len()
    }

    pub fn try_pop(&self) -> Option<f32> {
        self.queue.pop()
    }

    /// Count a device callback that ran out of samples
    pub fn record_underrun(&self) {
        self.underrun_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Drop everything queued; returns the number of samples dropped
    pub fn clear(&self) -> usize {
        let mut dropped = 0;
        while self.queue.pop().is_some() {
            dropped += 1;
        }
        dropped
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Free slots, in samples
    pub fn free(&self) -> usize {
        self.capacity() - self.len()
    }

    pub fn overflow_count(&self) -> usize {
        self.overflow_count.load(Ordering::Relaxed)
    }

    pub fn underrun_count(&self) -> usize {
        self.underrun_count.load(Ordering::Relaxed)
    }
}

/// Turns written bytes into samples, carrying partial samples over
/// between writes
pub struct SampleDecoder {
    encoding: SampleEncoding,
    partial: Vec<u8>,
    out: Vec<f32>,
}

impl SampleDecoder {
    pub fn new(encoding: SampleEncoding) -> Self {
        Self {
            encoding,
            partial: Vec::with_capacity(encoding.bytes_per_sample()),
            out: Vec::new(),
        }
    }

    /// Decode `bytes`; the returned slice is valid until the next call
    pub fn decode(&mut self, mut bytes: &[u8]) -> &[f32] {
        let width = self.encoding.bytes_per_sample();
        self.out.clear();

        if !self.partial.is_empty() {
            let need = width - self.partial.len();
            let take = need.min(bytes.len());
            self.partial.extend_from_slice(&bytes[..take]);
            bytes = &bytes[take..];
            if self.partial.len() == width {
                self.out.push(self.encoding.decode_f32(&self.partial));
                self.partial.clear();
            }
        }

        let mut chunks = bytes.chunks_exact(width);
        for sample in &mut chunks {
            self.out.push(self.encoding.decode_f32(sample));
        }
        self.partial.extend_from_slice(chunks.remainder());
        &self.out
    }

    pub fn reset(&mut self) {
        self.partial.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_overflow() {
        let queue = SampleQueue::new(4);
        assert_eq!(queue.push_samples(&[0.1, 0.2, 0.3]), 3);
        assert_eq!(queue.push_samples(&[0.4, 0.5, 0.6]), 1);
        assert_eq!(queue.overflow_count(), 2);
        assert_eq!(queue.free(), 0);

        assert_eq!(queue.try_pop(), Some(0.1));
        assert_eq!(queue.clear(), 3);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_decoder_carries_partial_samples() {
        let mut decoder = SampleDecoder::new(SampleEncoding::S16Le);
        let bytes = [0x00, 0x40, 0x00, 0xC0];
        assert_eq!(decoder.decode(&bytes[..1]), &[] as &[f32]);
        assert_eq!(decoder.decode(&bytes[1..3]), &[0.5]);
        assert_eq!(decoder.decode(&bytes[3..]), &[-0.5]);
    }

    #[test]
    fn test_decoder_u8() {
        let mut decoder = SampleDecoder::new(SampleEncoding::U8);
        assert_eq!(decoder.decode(&[0x80, 0x00]), &[0.0, -1.0]);
    }
}
