//! Audio engine boundary
//!
//! The registry never touches hardware. An [`AudioEngine`] describes devices
//! and opens [`EngineStream`]s; each stream owns the worker that moves
//! samples between its session buffer and the device.

pub mod dummy;
pub mod worker;

#[cfg(feature = "cpal-backend")]
pub mod hardware;

pub use dummy::DummyEngine;
pub use worker::{StopHandle, StopSignal, Worker};

use crate::audio::SharedRingBuffer;
use crate::config::{AppConfig, EngineKind};
use crate::error::EngineError;
use crate::protocol::{DeviceInfo, Direction, StreamParams};
use crate::session::SessionId;

/// Device enumeration and stream construction
pub trait AudioEngine: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &str;

    fn device_count(&self) -> u32;

    /// Capability description, empty for unknown indices
    fn device_info(&self, index: u32) -> DeviceInfo;

    /// Index of the system default device for a direction
    fn default_device(&self, direction: Direction) -> Option<u32> {
        (0..self.device_count()).find(|&index| {
            let info = self.device_info(index);
            info.is_default && info.direction() == direction
        })
    }

    /// First device carrying `name`, with its index
    fn device_info_by_name(&self, name: &str) -> Option<(u32, DeviceInfo)> {
        (0..self.device_count())
            .map(|index| (index, self.device_info(index)))
            .find(|(_, info)| !info.is_empty() && info.name == name)
    }

    /// Create a stream in the stopped state
    fn open_stream(
        &self,
        id: SessionId,
        direction: Direction,
        params: &StreamParams,
        buffer: SharedRingBuffer,
    ) -> Result<Box<dyn EngineStream>, EngineError>;
}

/// Sample transport for one session
///
/// Dropping the stream releases it. Implementations stop a still-running
/// worker on drop, but the session always stops it explicitly first.
pub trait EngineStream: Send {
    /// Begin transport on a worker
    fn start(&mut self) -> Result<(), EngineError>;

    /// Signal the worker to terminate; `None` when it was never started
    fn auto_stop(&mut self) -> Option<StopHandle>;

    fn is_running(&self) -> bool;

    /// Frames moved by the worker so far
    fn frames_transported(&self) -> u64;
}

impl<E: AudioEngine + ?Sized> AudioEngine for Box<E> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn device_count(&self) -> u32 {
        (**self).device_count()
    }

    fn device_info(&self, index: u32) -> DeviceInfo {
        (**self).device_info(index)
    }

    fn default_device(&self, direction: Direction) -> Option<u32> {
        (**self).default_device(direction)
    }

    fn device_info_by_name(&self, name: &str) -> Option<(u32, DeviceInfo)> {
        (**self).device_info_by_name(name)
    }

    fn open_stream(
        &self,
        id: SessionId,
        direction: Direction,
        params: &StreamParams,
        buffer: SharedRingBuffer,
    ) -> Result<Box<dyn EngineStream>, EngineError> {
        (**self).open_stream(id, direction, params, buffer)
    }
}

/// Build the engine selected in the configuration
pub fn from_config(config: &AppConfig) -> Result<Box<dyn AudioEngine>, EngineError> {
    match config.engine.kind {
        EngineKind::Dummy => Ok(Box::new(DummyEngine::new(config.worker.clone()))),
        #[cfg(feature = "cpal-backend")]
        EngineKind::Cpal => Ok(Box::new(hardware::CpalEngine::new(
            config.worker.clone(),
        ))),
        #[cfg(not(feature = "cpal-backend"))]
        EngineKind::Cpal => Err(EngineError::Backend(
            "built without the cpal-backend feature".to_string(),
        )),
    }
}
