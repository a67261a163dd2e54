//! # Orchestra Sessions
//!
//! Device-session registry between an application and an audio engine.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                           HOST APPLICATION                           │
//! │   open_output / open_input / start / stop / close_device  (i32 ids)  │
//! └───────────────────────────────────┬──────────────────────────────────┘
//!                                     │
//!                                     ▼
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                    Manager (lifecycle controller)                    │
//! │   validates ids, drives transitions, waits for workers on stop       │
//! │  ┌────────────────────────────────────────────────────────────────┐  │
//! │  │           Registry  (one lock: id counter + session map)       │  │
//! │  │   ┌───────────┐   ┌───────────┐   ┌───────────┐                │  │
//! │  │   │ Session 0 │   │ Session 1 │   │ Session 2 │   ...          │  │
//! │  │   │  output   │   │   input   │   │  output   │                │  │
//! │  │   └─────┬─────┘   └─────┬─────┘   └─────┬─────┘                │  │
//! │  └─────────┼───────────────┼───────────────┼──────────────────────┘  │
//! └────────────┼───────────────┼───────────────┼─────────────────────────┘
//!              ▼               ▼               ▼
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                 AudioEngine (dummy | cpal)                           │
//! │   ┌──────────────┐  ┌──────────────┐  ┌──────────────┐               │
//! │   │ EngineStream │  │ EngineStream │  │ EngineStream │               │
//! │   │ worker thread│  │ worker thread│  │ worker thread│               │
//! │   └──────┬───────┘  └──────┬───────┘  └──────┬───────┘               │
//! │          ▼                 ▼                 ▼                       │
//! │     ring buffer       ring buffer       ring buffer   <─> device     │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Session lifecycle: `Opened → Running → Stopping → Stopped`, then
//! removed on close. `stop` returns only after the worker has terminated.

pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod host;
pub mod manager;
pub mod protocol;
pub mod registry;
pub mod session;

pub use error::{Error, Result};
pub use host::HostLifecycle;
pub use manager::{Manager, INVALID_SESSION};
pub use protocol::{DeviceInfo, Direction, SampleFormat, StreamParams};
pub use session::{SessionId, SessionStatus, SessionSummary};

/// Application-wide constants
pub mod constants {
    /// Default sample rate for new sessions
    pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

    /// Default channel count (stereo)
    pub const DEFAULT_CHANNELS: u16 = 2;

    /// Frames moved per worker period (10 ms at 48 kHz)
    pub const DEFAULT_CHUNK_FRAMES: usize = 480;

    /// Per-session ring buffer capacity (in frames)
    pub const RING_BUFFER_CAPACITY: usize = 256;
}
