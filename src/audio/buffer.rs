//! Lock-free frame buffer between a session and its transport worker
//!
//! Input workers push captured frames and the application pops them; for
//! output sessions the roles swap. Either side may run on the worker thread,
//! so the queue is a bounded `ArrayQueue`.

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Block of interleaved samples
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Interleaved samples, normalized to [-1.0, 1.0]
    pub samples: Vec<f32>,
    pub channels: u16,
    /// Microseconds since the stream started
    pub timestamp: u64,
    pub sequence: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, channels: u16, timestamp: u64, sequence: u32) -> Self {
        Self {
            samples,
            channels,
            timestamp,
            sequence,
        }
    }

    /// Frame of `frames` silent frames
    pub fn silence(frames: usize, channels: u16, timestamp: u64, sequence: u32) -> Self {
        Self::new(vec![0.0; frames * channels as usize], channels, timestamp, sequence)
    }

    /// Convert 16-bit integer samples
    pub fn from_i16(data: &[i16], channels: u16, timestamp: u64, sequence: u32) -> Self {
        let samples = data.iter().map(|&s| s as f32 / i16::MAX as f32).collect();
        Self::new(samples, channels, timestamp, sequence)
    }

    /// Number of frames (samples per channel)
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }
}

/// Bounded frame queue with overflow and underrun accounting
pub struct RingBuffer {
    queue: ArrayQueue<AudioFrame>,
    overflow_count: AtomicUsize,
    underrun_count: AtomicUsize,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            overflow_count: AtomicUsize::new(0),
            underrun_count: AtomicUsize::new(0),
        }
    }

    /// Returns false when the buffer is full; the frame is dropped
    pub fn push(&self, frame: AudioFrame) -> bool {
        match self.queue.push(frame) {
            Ok(()) => true,
            Err(_) => {
                self.overflow_count.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Pop from the transport side, counting an underrun when empty
    pub fn pop(&self) -> Option<AudioFrame> {
        let frame = self.queue.pop();
        if frame.is_none() {
            self.underrun_count.fetch_add(1, Ordering::Relaxed);
        }
        frame
    }

    /// Pop from the application side without underrun accounting
    pub fn try_pop(&self) -> Option<AudioFrame> {
        self.queue.pop()
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

    pub fn overflow_count(&self) -> usize {
        self.overflow_count.load(Ordering::Relaxed)
    }

    pub fn underrun_count(&self) -> usize {
        self.underrun_count.load(Ordering::Relaxed)
    }
}

/// Thread-safe handle to a ring buffer
pub type SharedRingBuffer = Arc<RingBuffer>;

pub fn create_shared_buffer(capacity: usize) -> SharedRingBuffer {
    Arc::new(RingBuffer::new(capacity))
}
