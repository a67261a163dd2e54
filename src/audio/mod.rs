//! Audio sample transport between sessions and engine workers

pub mod buffer;

pub use buffer::{create_shared_buffer, AudioFrame, RingBuffer, SharedRingBuffer};
