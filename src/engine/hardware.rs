//! Hardware audio engine on top of cpal
//!
//! Device indices number the host's input devices first, then its output
//! devices, in enumeration order. cpal streams are not `Send`, so each
//! stream is built, played and dropped on its own worker thread; the device
//! is looked up again by name when the worker starts.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
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

/// Sample rates checked against each supported configuration range
const CANDIDATE_SAMPLE_RATES: [u32; 9] =
    [8000, 16000, 22050, 24000, 32000, 44100, 48000, 96000, 192000];

pub struct CpalEngine {
    worker: WorkerConfig,
}

impl CpalEngine {
    pub fn new(worker: WorkerConfig) -> Self {
        Self { worker }
    }

    /// Enumerate devices as (direction, device, description)
    fn devices(&self) -> Vec<(Direction, cpal::Device, DeviceInfo)> {
        let host = cpal::default_host();
        let default_input = host.default_input_device().and_then(|d| d.name().ok());
        let default_output = host.default_output_device().and_then(|d| d.name().ok());
        let mut devices = Vec::new();

        if let Ok(inputs) = host.input_devices() {
            for device in inputs {
                if let Some(info) = describe(&device, Direction::Input, default_input.as_deref()) {
                    devices.push((Direction::Input, device, info));
                }
            }
        }
        if let Ok(outputs) = host.output_devices() {
            for device in outputs {
                let info = describe(&device, Direction::Output, default_output.as_deref());
                if let Some(info) = info {
                    devices.push((Direction::Output, device, info));
                }
            }
        }

        devices
    }
}

impl Default for CpalEngine {
    fn default() -> Self {
        Self::new(WorkerConfig::default())
    }
}

fn describe(
    device: &cpal::Device,
    direction: Direction,
    default_name: Option<&str>,
) -> Option<DeviceInfo> {
    let name = device.name().ok()?;
    let configs: Vec<cpal::SupportedStreamConfigRange> = match direction {
        Direction::Input => device.supported_input_configs().ok()?.collect(),
        Direction::Output => device.supported_output_configs().ok()?.collect(),
    };

    let mut sample_rates = Vec::new();
    let mut formats = Vec::new();
    let mut max_channels = 0u16;
    for config in &configs {
        for rate in CANDIDATE_SAMPLE_RATES {
            let candidate = cpal::SampleRate(rate);
            if candidate >= config.min_sample_rate()
                && candidate <= config.max_sample_rate()
                && !sample_rates.contains(&rate)
            {
                sample_rates.push(rate);
            }
        }
        if let Some(format) = convert_format(config.sample_format()) {
            if !formats.contains(&format) {
                formats.push(format);
            }
        }
        max_channels = max_channels.max(config.channels());
    }
    sample_rates.sort_unstable();

    Some(DeviceInfo {
        is_correct: true,
        input: direction == Direction::Input,
        is_default: default_name == Some(name.as_str()),
        name,
        desc: String::new(),
        channels: Channel::layout(max_channels),
        sample_rates,
        native_formats: formats,
    })
}

fn convert_format(format: cpal::SampleFormat) -> Option<SampleFormat> {
    match format {
        cpal::SampleFormat::I8 => Some(SampleFormat::Int8),
        cpal::SampleFormat::I16 => Some(SampleFormat::Int16),
        cpal::SampleFormat::I32 => Some(SampleFormat::Int32),
        cpal::SampleFormat::I64 => Some(SampleFormat::Int64),
        cpal::SampleFormat::F32 => Some(SampleFormat::Float),
        cpal::SampleFormat::F64 => Some(SampleFormat::Double),
        _ => None,
    }
}

fn find_device(direction: Direction, name: &str) -> Result<cpal::Device, EngineError> {
    let host = cpal::default_host();
    let devices = match direction {
        Direction::Input => host.input_devices(),
        Direction::Output => host.output_devices(),
    }
    .map_err(|e| EngineError::Backend(e.to_string()))?;

    for device in devices {
        if device.name().ok().as_deref() == Some(name) {
            return Ok(device);
        }
    }
    Err(EngineError::DeviceNotFound(format!("{}:{}", direction, name)))
}

impl AudioEngine for CpalEngine {
    fn name(&self) -> &str {
        "cpal"
    }

    fn device_count(&self) -> u32 {
        self.devices().len() as u32
    }

    fn device_info(&self, index: u32) -> DeviceInfo {
        self.devices()
            .into_iter()
            .nth(index as usize)
            .map(|(_, _, info)| info)
            .unwrap_or_else(DeviceInfo::empty)
    }

    fn default_device(&self, direction: Direction) -> Option<u32> {
        self.devices()
            .iter()
            .position(|(d, _, info)| *d == direction && info.is_default)
            .map(|index| index as u32)
    }

    fn device_info_by_name(&self, name: &str) -> Option<(u32, DeviceInfo)> {
        self.devices()
            .into_iter()
            .enumerate()
            .find(|(_, (_, _, info))| info.name == name)
            .map(|(index, (_, _, info))| (index as u32, info))
    }

    fn open_stream(
        &self,
        id: SessionId,
        direction: Direction,
        params: &StreamParams,
        buffer: SharedRingBuffer,
    ) -> Result<Box<dyn EngineStream>, EngineError> {
        let (device_direction, _, info) = self
            .devices()
            .into_iter()
            .nth(params.device_index as usize)
            .ok_or_else(|| EngineError::DeviceNotFound(params.device_index.to_string()))?;

        if device_direction != direction {
            return Err(EngineError::StreamError(format!(
                "device {} ({}) is not an {} device",
                params.device_index, info.name, direction
            )));
        }
        if !matches!(params.format, SampleFormat::Int16 | SampleFormat::Float) {
            return Err(EngineError::UnsupportedFormat(params.format.to_string()));
        }
        if params.channels == 0 || params.sample_rate == 0 {
            return Err(EngineError::StreamError(format!(
                "invalid configuration: {} Hz, {} channels",
                params.sample_rate, params.channels
            )));
        }

        Ok(Box::new(CpalStream {
            id,
            direction,
            params: *params,
            device_name: info.name,
            poll_interval: self.worker.poll_interval(),
            start_timeout: self.worker.start_timeout(),
            buffer,
            frames: Arc::new(AtomicU64::new(0)),
            worker: None,
        }))
    }
}

/// Drains the session buffer into device callbacks, padding with silence
struct OutputCursor {
    buffer: SharedRingBuffer,
    pending: Vec<f32>,
    position: usize,
}

impl OutputCursor {
    fn new(buffer: SharedRingBuffer) -> Self {
        Self {
            buffer,
            pending: Vec::new(),
            position: 0,
        }
    }

    fn next_sample(&mut self) -> f32 {
        if self.position >= self.pending.len() {
            match self.buffer.pop() {
                Some(frame) => {
                    self.pending = frame.samples;
                    self.position = 0;
                }
                None => return 0.0,
            }
        }
        match self.pending.get(self.position) {
            Some(&sample) => {
                self.position += 1;
                sample
            }
            None => 0.0,
        }
    }

    fn fill<T>(&mut self, data: &mut [T], convert: impl Fn(f32) -> T) {
        for sample in data.iter_mut() {
            *sample = convert(self.next_sample());
        }
    }
}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

fn report_stream_error(err: cpal::StreamError) {
    tracing::error!("Stream error: {}", err);
}

/// Wait for a worker's ready report
///
/// A worker that has not reported within `timeout` is told to stop and left
/// to exit on its own once the driver call it is stuck in returns.
fn await_ready(
    worker: Worker,
    ready: &Receiver<Result<(), EngineError>>,
    timeout: Duration,
) -> Result<Worker, EngineError> {
    match ready.recv_timeout(timeout) {
        Ok(Ok(())) => Ok(worker),
        // dropping the worker joins it
        Ok(Err(e)) => Err(e),
        Err(RecvTimeoutError::Timeout) => {
            tracing::error!(
                "Worker {} did not report within {:?}, abandoning it",
                worker.name(),
                timeout
            );
            worker.detach();
            Err(EngineError::Backend(format!(
                "stream did not start within {:?}",
                timeout
            )))
        }
        Err(RecvTimeoutError::Disconnected) => Err(EngineError::Backend(
            "worker exited before reporting".to_string(),
        )),
    }
}

pub struct CpalStream {
    id: SessionId,
    direction: Direction,
    params: StreamParams,
    device_name: String,
    poll_interval: Duration,
    start_timeout: Duration,
    buffer: SharedRingBuffer,
    frames: Arc<AtomicU64>,
    worker: Option<Worker>,
}

impl CpalStream {
    fn build(
        device: &cpal::Device,
        direction: Direction,
        params: StreamParams,
        buffer: SharedRingBuffer,
        frames: Arc<AtomicU64>,
    ) -> Result<cpal::Stream, EngineError> {
        let config = cpal::StreamConfig {
            channels: params.channels,
            sample_rate: cpal::SampleRate(params.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let channels = params.channels;
        let started = Instant::now();
        let mut sequence: u32 = 0;

        let stream = match (direction, params.format) {
            (Direction::Input, SampleFormat::Int16) => device.build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    let timestamp = started.elapsed().as_micros() as u64;
                    let frame = AudioFrame::from_i16(data, channels, timestamp, sequence);
                    frames.fetch_add(frame.frames() as u64, Ordering::Relaxed);
                    buffer.push(frame);
                    sequence = sequence.wrapping_add(1);
                },
                report_stream_error,
                None,
            ),
            (Direction::Input, SampleFormat::Float) => device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let timestamp = started.elapsed().as_micros() as u64;
                    let frame = AudioFrame::new(data.to_vec(), channels, timestamp, sequence);
                    frames.fetch_add(frame.frames() as u64, Ordering::Relaxed);
                    buffer.push(frame);
                    sequence = sequence.wrapping_add(1);
                },
                report_stream_error,
                None,
            ),
            (Direction::Output, SampleFormat::Int16) => {
                let mut cursor = OutputCursor::new(buffer);
                device.build_output_stream(
                    &config,
                    move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                        cursor.fill(data, to_i16);
                        let count = data.len() / channels as usize;
                        frames.fetch_add(count as u64, Ordering::Relaxed);
                    },
                    report_stream_error,
                    None,
                )
            }
            (Direction::Output, SampleFormat::Float) => {
                let mut cursor = OutputCursor::new(buffer);
                device.build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        cursor.fill(data, |s| s);
                        let count = data.len() / channels as usize;
                        frames.fetch_add(count as u64, Ordering::Relaxed);
                    },
                    report_stream_error,
                    None,
                )
            }
            (_, format) => return Err(EngineError::UnsupportedFormat(format.to_string())),
        };

        stream.map_err(|e| EngineError::StreamError(e.to_string()))
    }
}

impl EngineStream for CpalStream {
    fn start(&mut self) -> Result<(), EngineError> {
        if self.is_running() {
            return Ok(());
        }

        let (ready_tx, ready_rx) = bounded::<Result<(), EngineError>>(1);
        let direction = self.direction;
        let params = self.params;
        let device_name = self.device_name.clone();
        let buffer = self.buffer.clone();
        let frames = self.frames.clone();
        let poll = self.poll_interval;

        let worker = Worker::spawn(format!("cpal-{}-{}", direction, self.id), move |signal| {
            let stream = find_device(direction, &device_name)
                .and_then(|device| Self::build(&device, direction, params, buffer, frames))
                .and_then(|stream| {
                    stream
                        .play()
                        .map(|()| stream)
                        .map_err(|e| EngineError::StreamError(e.to_string()))
                });

            match stream {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    while signal.sleep(poll, poll) {}
                    // Stream is dropped here, stopping transport
                    drop(stream);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            }
        })?;

        let worker = await_ready(worker, &ready_rx, self.start_timeout)?;
        tracing::info!("Started {} stream on {}", self.direction, self.device_name);
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
