//! Simulated audio engine
//!
//! Devices come from a fixed table and workers move silent frames at the
//! stream's real-time rate. Used when no hardware backend is configured and
//! throughout the test suite.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::audio::{AudioFrame, SharedRingBuffer};
use crate::config::WorkerConfig;
use crate::engine::worker::{StopHandle, Worker};
use crate::engine::{AudioEngine, EngineStream};
use crate::error::EngineError;
use crate::protocol::{Channel, DeviceInfo, Direction, SampleFormat, StreamParams};
use crate::session::SessionId;

/// Shortest worker period, keeps absurd sample rates from spinning
const MIN_PERIOD: Duration = Duration::from_micros(100);

pub struct DummyEngine {
    devices: Vec<DeviceInfo>,
    worker: WorkerConfig,
}

impl DummyEngine {
    /// Engine exposing the single default speaker
    pub fn new(worker: WorkerConfig) -> Self {
        Self::with_devices(vec![Self::speaker()], worker)
    }

    pub fn with_devices(devices: Vec<DeviceInfo>, worker: WorkerConfig) -> Self {
        Self { devices, worker }
    }

    /// Stereo 16-bit output device, the system default
    pub fn speaker() -> DeviceInfo {
        DeviceInfo {
            is_correct: true,
            input: false,
            name: "speaker".to_string(),
            desc: String::new(),
            channels: vec![Channel::FrontLeft, Channel::FrontRight],
            sample_rates: vec![8000, 16000, 24000, 32000, 48000, 96000],
            native_formats: vec![SampleFormat::Int16],
            is_default: true,
        }
    }
}

impl Default for DummyEngine {
    fn default() -> Self {
        Self::new(WorkerConfig::default())
    }
}

impl AudioEngine for DummyEngine {
    fn name(&self) -> &str {
        "dummy"
    }

    fn device_count(&self) -> u32 {
        self.devices.len() as u32
    }

    fn device_info(&self, index: u32) -> DeviceInfo {
        self.devices
            .get(index as usize)
            .cloned()
            .unwrap_or_else(DeviceInfo::empty)
    }

    fn open_stream(
        &self,
        id: SessionId,
        direction: Direction,
        params: &StreamParams,
        buffer: SharedRingBuffer,
    ) -> Result<Box<dyn EngineStream>, EngineError> {
        if params.device_index >= self.device_count() {
            return Err(EngineError::DeviceNotFound(params.device_index.to_string()));
        }
        if params.channels == 0 || params.sample_rate == 0 {
            return Err(EngineError::StreamError(format!(
                "invalid configuration: {} Hz, {} channels",
                params.sample_rate, params.channels
            )));
        }
        if params.format == SampleFormat::Unknown {
            return Err(EngineError::UnsupportedFormat(params.format.to_string()));
        }

        Ok(Box::new(DummyStream {
            id,
            direction,
            params: *params,
            chunk_frames: self.worker.chunk_frames.max(1),
            poll_interval: self.worker.poll_interval(),
            buffer,
            frames: Arc::new(AtomicU64::new(0)),
            worker: None,
        }))
    }
}

/// Stream whose worker paces silent frames in or out of the session buffer
pub struct DummyStream {
    id: SessionId,
    direction: Direction,
    params: StreamParams,
    chunk_frames: usize,
    poll_interval: Duration,
    buffer: SharedRingBuffer,
    frames: Arc<AtomicU64>,
    worker: Option<Worker>,
}

impl EngineStream for DummyStream {
    fn start(&mut self) -> Result<(), EngineError> {
        if self.is_running() {
            return Ok(());
        }

        let direction = self.direction;
        let chunk = self.chunk_frames;
        let channels = self.params.channels;
        let period = self.params.frames_duration(chunk).max(MIN_PERIOD);
        let slice = self.poll_interval;
        let buffer = self.buffer.clone();
        let frames = self.frames.clone();

        let worker = Worker::spawn(format!("dummy-{}-{}", direction, self.id), move |signal| {
            let started = Instant::now();
            let mut sequence: u32 = 0;
            while signal.sleep(period, slice) {
                match direction {
                    Direction::Input => {
                        let timestamp = started.elapsed().as_micros() as u64;
                        buffer.push(AudioFrame::silence(chunk, channels, timestamp, sequence));
                    }
                    Direction::Output => {
                        // underruns play as silence
                        let _ = buffer.pop();
                    }
                }
                sequence = sequence.wrapping_add(1);
                frames.fetch_add(chunk as u64, Ordering::Relaxed);
            }
        })?;

        self.worker = Some(worker);
        Ok(())
    }

    fn auto_stop(&mut self) -> Option<StopHandle> {
        self.worker.as_mut().map(Worker::request_stop)
    }

    fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(Worker::is_running)
    }

    fn frames_transported(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }
}
