//! Session lifecycle controller
//!
//! [`Manager`] is what a host talks to. It has two faces:
//!
//! - a typed API (`open`, `start_session`, `stop_session`, `close_session`)
//!   returning [`Result`](crate::Result), and
//! - the host-facing calls (`open_output`, `open_input`, `start`, `stop`,
//!   `close_device`, ...) taking raw `i32` identifiers and reporting every
//!   failure as `-1` or `false`.
//!
//! Every call revalidates the identifier against the registry. The registry
//! lock covers only the map and the identifier counter: engine calls
//! (opening a stream, starting it, waiting for its worker) run with it
//! released, under the session's own lock at most. A slow device therefore
//! never blocks calls against another session. `stop` holds no lock at all
//! while it waits for the worker.
//!
//! Closing a running session stops it first: the worker is signalled and
//! awaited before the engine stream is released.

use parking_lot::Mutex;

use crate::audio::{create_shared_buffer, SharedRingBuffer};
use crate::config::{AppConfig, WorkerConfig};
use crate::engine::{self, AudioEngine};
use crate::error::{Error, Result, SessionError};
use crate::host::HostLifecycle;
use crate::protocol::{DeviceInfo, Direction, SampleFormat, StreamParams};
use crate::registry::{Registry, SharedSession};
use crate::session::{Session, SessionId, SessionStatus, SessionSummary};

/// Identifier returned by the host-facing open calls on failure
pub const INVALID_SESSION: i32 = -1;

pub struct Manager<E: AudioEngine = Box<dyn AudioEngine>> {
    engine: E,
    registry: Mutex<Registry>,
    worker: WorkerConfig,
}

impl Manager {
    /// Manager over the engine selected in the configuration
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        config.validate()?;
        let engine = engine::from_config(config)?;
        Ok(Self::new(engine, config.worker.clone()))
    }
}

impl<E: AudioEngine> Manager<E> {
    pub fn new(engine: E, worker: WorkerConfig) -> Self {
        tracing::info!("Session manager using {} engine", engine.name());
        Self {
            engine,
            registry: Mutex::new(Registry::new()),
            worker,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn device_count(&self) -> u32 {
        self.engine.device_count()
    }

    pub fn device_info(&self, index: u32) -> DeviceInfo {
        self.engine.device_info(index)
    }

    /// Default device for a direction, if the engine reports one
    pub fn default_device(&self, direction: Direction) -> Option<u32> {
        self.engine.default_device(direction)
    }

    /// Index and properties of the device with the given name
    pub fn device_by_name(&self, name: &str) -> Option<(u32, DeviceInfo)> {
        self.engine.device_info_by_name(name)
    }

    fn session(&self, id: SessionId) -> Result<SharedSession> {
        self.registry
            .lock()
            .find(id)
            .ok_or_else(|| SessionError::NotFound(id.0).into())
    }

    /// Open a session in the `Opened` state; the stream is not started
    ///
    /// The identifier is reserved first, so a failed open still consumes it.
    pub fn open(&self, direction: Direction, params: StreamParams) -> Result<SessionId> {
        let id = self.registry.lock().reserve()?;

        let buffer = create_shared_buffer(self.worker.buffer_capacity);
        let stream = self
            .engine
            .open_stream(id, direction, &params, buffer.clone())
            .map_err(|e| SessionError::AllocationFailed {
                id: id.0,
                reason: e.to_string(),
            })?;

        let session = Session::new(id, direction, params, buffer, stream);
        self.registry.lock().insert(session);

        tracing::info!(
            "Opened {} session {} on device {} ({} Hz, {} ch, {})",
            direction,
            id,
            params.device_index,
            params.sample_rate,
            params.channels,
            params.format
        );
        Ok(id)
    }

    /// Start a session's transport
    ///
    /// Only this session is locked while the engine starts the stream. A close
    /// arriving meanwhile waits for the start and then stops the worker.
    pub fn start_session(&self, id: SessionId) -> Result<()> {
        self.session(id)?.lock().start()?;
        tracing::info!("Session {} running", id);
        Ok(())
    }

    /// Stop a session, returning once its worker has terminated
    ///
    /// A concurrent stop of the same session waits on the same termination
    /// and also succeeds; only one of them joins the thread.
    pub fn stop_session(&self, id: SessionId) -> Result<()> {
        let session = self.session(id)?;
        let handle = session.lock().begin_stop();

        handle.wait(self.worker.stop_retry());

        // a concurrent close may already have finished the session
        session.lock().finish_stop();
        tracing::info!("Session {} stopped", id);
        Ok(())
    }

    /// Remove a session and release its stream, stopping it first if needed
    pub fn close_session(&self, id: SessionId) -> Result<()> {
        let session = self
            .registry
            .lock()
            .remove(id)
            .ok_or(SessionError::NotFound(id.0))?;
        session.lock().close(self.worker.stop_retry());
        tracing::info!("Session {} closed", id);
        Ok(())
    }

    /// Close every session, inputs first
    pub fn close_all(&self) {
        let sessions = self.registry.lock().drain();
        for session in sessions {
            let mut session = session.lock();
            session.close(self.worker.stop_retry());
            tracing::info!("Session {} closed", session.id());
        }
    }

    /// Frame buffer shared with the session's worker
    pub fn buffer(&self, id: SessionId) -> Option<SharedRingBuffer> {
        let session = self.session(id).ok()?;
        let buffer = session.lock().buffer().clone();
        Some(buffer)
    }

    pub fn status(&self, id: SessionId) -> Option<SessionStatus> {
        let session = self.session(id).ok()?;
        let status = session.lock().status();
        Some(status)
    }

    pub fn summary(&self, id: SessionId) -> Option<SessionSummary> {
        let session = self.session(id).ok()?;
        let summary = session.lock().summary();
        Some(summary)
    }

    /// Snapshot of all live sessions, inputs first
    pub fn sessions(&self) -> Vec<SessionSummary> {
        let sessions: Vec<SharedSession> = self.registry.lock().iter().cloned().collect();
        sessions.iter().map(|s| s.lock().summary()).collect()
    }

    fn resolve(&self, raw: i32, operation: &str) -> Option<SessionId> {
        let id = SessionId::from_raw(raw);
        if id.is_none() {
            tracing::warn!(
                "Can not {} device: {}",
                operation,
                SessionError::InvalidId(raw.into())
            );
        }
        id
    }

    fn report(&self, operation: &str, id: SessionId, result: Result<()>) -> bool {
        match result {
            Ok(()) => true,
            Err(Error::Session(e)) if e.is_benign() => {
                tracing::warn!(
                    "Can not {} device with UID: {} Element does not exist ...",
                    operation,
                    id
                );
                false
            }
            Err(e) => {
                tracing::error!("Can not {} device with UID: {}: {}", operation, id, e);
                false
            }
        }
    }

    fn open_raw(&self, direction: Direction, params: StreamParams) -> i32 {
        match self.open(direction, params) {
            Ok(id) => id.to_raw(),
            Err(e) => {
                tracing::error!("Can not open {} device {}: {}", direction, params.device_index, e);
                INVALID_SESSION
            }
        }
    }

    pub fn get_device_count(&self) -> u32 {
        tracing::debug!("Get device list");
        self.device_count()
    }

    /// Property record for a device, `{}` when it does not exist
    pub fn get_device_property(&self, device_index: i32) -> String {
        match u32::try_from(device_index) {
            Ok(index) => self.device_info(index).to_property(),
            Err(_) => DeviceInfo::empty().to_property(),
        }
    }

    /// Returns the new session id, or -1
    pub fn open_output(
        &self,
        device_index: u32,
        freq: u32,
        channels: u16,
        format: SampleFormat,
    ) -> i32 {
        self.open_raw(
            Direction::Output,
            StreamParams::new(device_index, freq, channels, format),
        )
    }

    /// Returns the new session id, or -1
    pub fn open_input(
        &self,
        device_index: u32,
        freq: u32,
        channels: u16,
        format: SampleFormat,
    ) -> i32 {
        self.open_raw(
            Direction::Input,
            StreamParams::new(device_index, freq, channels, format),
        )
    }

    pub fn close_device(&self, id: i32) -> bool {
        tracing::debug!("Close device: {}", id);
        let Some(id) = self.resolve(id, "close") else {
            return false;
        };
        self.report("close", id, self.close_session(id))
    }

    pub fn start(&self, id: i32) -> bool {
        tracing::debug!("Start device: {}", id);
        let Some(id) = self.resolve(id, "start") else {
            return false;
        };
        self.report("start", id, self.start_session(id))
    }

    /// Blocks until the session's worker has terminated
    pub fn stop(&self, id: i32) -> bool {
        tracing::debug!("Stop device: {}", id);
        let Some(id) = self.resolve(id, "stop") else {
            return false;
        };
        self.report("stop", id, self.stop_session(id))
    }
}

impl<E: AudioEngine> HostLifecycle for Manager<E> {}

impl<E: AudioEngine> Drop for Manager<E> {
    fn drop(&mut self) {
        if !self.registry.get_mut().is_empty() {
            self.close_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioFrame;
    use crate::engine::{DummyEngine, EngineStream, StopHandle};
    use crate::error::EngineError;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    const INT16: SampleFormat = SampleFormat::Int16;

    fn worker_config() -> WorkerConfig {
        WorkerConfig {
            chunk_frames: 16,
            poll_interval_ms: 1,
            stop_retry_ms: 5,
            buffer_capacity: 64,
            ..WorkerConfig::default()
        }
    }

    fn manager() -> Manager<DummyEngine> {
        Manager::new(DummyEngine::new(worker_config()), worker_config())
    }

    /// Dummy engine whose streams for one session take `delay` to start
    struct SlowStartEngine {
        inner: DummyEngine,
        slow: SessionId,
        delay: Duration,
    }

    struct SlowStartStream {
        inner: Box<dyn EngineStream>,
        delay: Option<Duration>,
    }

    impl EngineStream for SlowStartStream {
        fn start(&mut self) -> std::result::Result<(), EngineError> {
            if let Some(delay) = self.delay {
                thread::sleep(delay);
            }
            self.inner.start()
        }

        fn auto_stop(&mut self) -> Option<StopHandle> {
            self.inner.auto_stop()
        }

        fn is_running(&self) -> bool {
            self.inner.is_running()
        }

        fn frames_transported(&self) -> u64 {
            self.inner.frames_transported()
        }
    }

    impl AudioEngine for SlowStartEngine {
        fn name(&self) -> &str {
            "slow-start"
        }

        fn device_count(&self) -> u32 {
            self.inner.device_count()
        }

        fn device_info(&self, index: u32) -> DeviceInfo {
            self.inner.device_info(index)
        }

        fn open_stream(
            &self,
            id: SessionId,
            direction: Direction,
            params: &StreamParams,
            buffer: SharedRingBuffer,
        ) -> std::result::Result<Box<dyn EngineStream>, EngineError> {
            let inner = self.inner.open_stream(id, direction, params, buffer)?;
            Ok(Box::new(SlowStartStream {
                inner,
                delay: (id == self.slow).then_some(self.delay),
            }))
        }
    }

    fn slow_manager(slow: SessionId, delay: Duration) -> Arc<Manager<SlowStartEngine>> {
        let engine = SlowStartEngine {
            inner: DummyEngine::new(worker_config()),
            slow,
            delay,
        };
        Arc::new(Manager::new(engine, worker_config()))
    }

    fn frames(manager: &Manager<DummyEngine>, id: i32) -> u64 {
        manager
            .summary(SessionId::from_raw(id).unwrap())
            .unwrap()
            .frames_transported
    }

    #[test]
    fn test_output_lifecycle() {
        let manager = manager();
        let id = manager.open_output(0, 48000, 2, INT16);
        assert_eq!(id, 0);
        assert_eq!(manager.status(SessionId(0)), Some(SessionStatus::Opened));

        assert!(manager.start(id));
        assert_eq!(manager.status(SessionId(0)), Some(SessionStatus::Running));
        assert!(manager.stop(id));
        assert_eq!(manager.status(SessionId(0)), Some(SessionStatus::Stopped));
        assert!(manager.close_device(id));
        assert!(!manager.close_device(id));
        assert!(manager.sessions().is_empty());
    }

    #[test]
    fn test_ids_not_reused_across_directions() {
        let manager = manager();
        assert_eq!(manager.open_input(0, 16000, 1, INT16), 0);
        assert_eq!(manager.open_output(0, 48000, 2, INT16), 1);
        assert!(manager.close_device(0));
        assert_eq!(manager.open_input(0, 16000, 1, INT16), 2);
    }

    #[test]
    fn test_unknown_and_negative_ids() {
        let manager = manager();
        assert!(!manager.start(-1));
        assert!(!manager.stop(-1));
        assert!(!manager.close_device(-1));
        assert!(!manager.stop(99));
        assert!(!manager.start(99));
        assert!(!manager.close_device(99));

        let id = manager.open_output(0, 48000, 2, INT16);
        assert!(!manager.start(-1));
        assert_eq!(manager.status(SessionId(id as u32)), Some(SessionStatus::Opened));
    }

    #[test]
    fn test_closed_session_is_gone() {
        let manager = manager();
        let id = manager.open_output(0, 48000, 2, INT16);
        assert!(manager.close_device(id));
        assert!(!manager.start(id));
        assert!(!manager.stop(id));
        assert!(manager.buffer(SessionId(id as u32)).is_none());
    }

    #[test]
    fn test_failed_open_returns_sentinel_and_skips_id() {
        let manager = manager();
        assert_eq!(manager.open_output(5, 48000, 2, INT16), INVALID_SESSION);
        assert_eq!(manager.open_input(0, 16000, 0, INT16), INVALID_SESSION);
        assert!(manager.sessions().is_empty());
        assert_eq!(manager.open_output(0, 48000, 2, INT16), 2);
        assert!(matches!(
            manager.open(Direction::Output, StreamParams::new(0, 48000, 2, SampleFormat::Unknown)),
            Err(Error::Session(SessionError::AllocationFailed { id: 3, .. }))
        ));
    }

    #[test]
    fn test_stop_is_synchronous_with_worker() {
        let manager = manager();
        let id = manager.open_input(0, 16000, 1, INT16);
        assert!(manager.start(id));
        thread::sleep(Duration::from_millis(20));

        assert!(manager.stop(id));
        let after_stop = frames(&manager, id);
        assert!(after_stop > 0);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(frames(&manager, id), after_stop);

        let buffer = manager.buffer(SessionId(id as u32)).unwrap();
        assert!(buffer.try_pop().is_some());
    }

    #[test]
    fn test_stop_before_start_and_restart_rejected() {
        let manager = manager();
        let id = manager.open_output(0, 48000, 2, INT16);
        assert!(manager.stop(id));
        assert!(manager.stop(id));
        assert_eq!(manager.status(SessionId(id as u32)), Some(SessionStatus::Stopped));
        assert!(!manager.start(id));
        assert!(matches!(
            manager.start_session(SessionId(id as u32)),
            Err(Error::Session(SessionError::InvalidState { .. }))
        ));
    }

    #[test]
    fn test_close_stops_running_session() {
        let manager = manager();
        let id = manager.open_output(0, 16000, 2, INT16);
        let buffer = manager.buffer(SessionId(id as u32)).unwrap();
        buffer.push(AudioFrame::silence(16, 2, 0, 0));
        assert!(manager.start(id));
        thread::sleep(Duration::from_millis(10));

        assert!(manager.close_device(id));
        // the worker held the only other reference to the buffer
        assert_eq!(Arc::strong_count(&buffer), 1);
        assert!(!manager.stop(id));
    }

    #[test]
    fn test_concurrent_stops_of_one_session() {
        let manager = Arc::new(manager());
        let id = manager.open_input(0, 16000, 1, INT16);
        assert!(manager.start(id));
        thread::sleep(Duration::from_millis(5));

        let stoppers: Vec<_> = (0..4)
            .map(|_| {
                let manager = manager.clone();
                thread::spawn(move || manager.stop(id))
            })
            .collect();
        for stopper in stoppers {
            assert!(stopper.join().unwrap());
        }
        assert_eq!(manager.status(SessionId(id as u32)), Some(SessionStatus::Stopped));
    }

    #[test]
    fn test_concurrent_opens_get_distinct_ids() {
        let manager = Arc::new(manager());
        let openers: Vec<_> = (0..8)
            .map(|n| {
                let manager = manager.clone();
                thread::spawn(move || {
                    (0..10)
                        .map(|_| {
                            if n % 2 == 0 {
                                manager.open_input(0, 16000, 1, INT16)
                            } else {
                                manager.open_output(0, 48000, 2, INT16)
                            }
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut ids: Vec<i32> = openers
            .into_iter()
            .flat_map(|opener| opener.join().unwrap())
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, (0..80).collect::<Vec<_>>());
        assert_eq!(manager.sessions().len(), 80);
    }

    #[test]
    fn test_stop_leaves_other_sessions_running() {
        let manager = manager();
        let a = manager.open_output(0, 16000, 2, INT16);
        let b = manager.open_input(0, 16000, 1, INT16);
        assert!(manager.start(a));
        assert!(manager.start(b));

        assert!(manager.stop(a));
        assert_eq!(manager.status(SessionId(b as u32)), Some(SessionStatus::Running));
        let listed: Vec<SessionId> = manager.sessions().iter().map(|s| s.id).collect();
        assert_eq!(listed, vec![SessionId(b as u32), SessionId(a as u32)]);
    }

    #[test]
    fn test_device_property() {
        let manager = manager();
        assert_eq!(manager.get_device_count(), 1);
        let property = manager.get_device_property(0);
        let info = DeviceInfo::from_property(&property);
        assert_eq!(info.name, "speaker");
        assert!(info.is_default);
        assert_eq!(manager.get_device_property(1), "{}");
        assert_eq!(manager.get_device_property(-3), "{}");
    }

    #[test]
    fn test_host_hooks_leave_sessions_alone() {
        let manager = manager();
        let id = manager.open_output(0, 48000, 2, INT16);
        assert!(manager.start(id));
        manager.on_create();
        manager.on_pause();
        manager.on_stop();
        manager.on_destroy();
        assert_eq!(manager.status(SessionId(id as u32)), Some(SessionStatus::Running));
    }

    #[test]
    fn test_drop_closes_running_sessions() {
        let manager = manager();
        let id = manager.open_input(0, 16000, 1, INT16);
        let buffer = manager.buffer(SessionId(id as u32)).unwrap();
        assert!(manager.start(id));
        drop(manager);
        assert_eq!(Arc::strong_count(&buffer), 1);
    }

    #[test]
    fn test_from_config() {
        let manager = Manager::from_config(&AppConfig::default()).unwrap();
        assert_eq!(manager.engine().name(), "dummy");
        assert_eq!(manager.open_output(0, 48000, 2, INT16), 0);
    }

    #[test]
    fn test_slow_start_does_not_block_other_sessions() {
        let manager = slow_manager(SessionId(1), Duration::from_millis(300));
        let a = manager.open_output(0, 16000, 2, INT16);
        let b = manager.open_output(0, 16000, 2, INT16);
        assert!(manager.start(a));

        let starter = {
            let manager = manager.clone();
            thread::spawn(move || manager.start(b))
        };
        thread::sleep(Duration::from_millis(30));

        let begun = Instant::now();
        assert!(manager.stop(a));
        let c = manager.open_input(0, 16000, 1, INT16);
        assert!(manager.close_device(c));
        assert_eq!(manager.status(SessionId(a as u32)), Some(SessionStatus::Stopped));
        assert!(begun.elapsed() < Duration::from_millis(150));

        assert!(starter.join().unwrap());
        assert_eq!(manager.status(SessionId(b as u32)), Some(SessionStatus::Running));
    }

    #[test]
    fn test_close_during_slow_start() {
        let manager = slow_manager(SessionId(0), Duration::from_millis(100));
        let id = manager.open_output(0, 16000, 2, INT16);
        let buffer = manager.buffer(SessionId(0)).unwrap();

        let starter = {
            let manager = manager.clone();
            thread::spawn(move || manager.start(id))
        };
        thread::sleep(Duration::from_millis(30));

        // waits for the start, then stops the worker it launched
        assert!(manager.close_device(id));
        assert!(starter.join().unwrap());
        assert_eq!(Arc::strong_count(&buffer), 1);
        assert!(manager.sessions().is_empty());
    }

    #[test]
    fn test_stop_racing_close() {
        let manager = Arc::new(manager());
        for _ in 0..50 {
            let id = manager.open_output(0, 16000, 2, INT16);
            let buffer = manager.buffer(SessionId(id as u32)).unwrap();
            assert!(manager.start(id));

            let stopper = {
                let manager = manager.clone();
                thread::spawn(move || manager.stop(id))
            };
            let closer = {
                let manager = manager.clone();
                thread::spawn(move || manager.close_device(id))
            };

            // the stop may find the session already gone
            let _ = stopper.join().unwrap();
            assert!(closer.join().unwrap());
            assert_eq!(Arc::strong_count(&buffer), 1);
            assert_eq!(manager.status(SessionId(id as u32)), None);
        }
        assert!(manager.sessions().is_empty());
    }

    #[test]
    fn test_default_and_named_devices() {
        let manager = manager();
        assert_eq!(manager.default_device(Direction::Output), Some(0));
        assert_eq!(manager.default_device(Direction::Input), None);
        let (index, info) = manager.device_by_name("speaker").unwrap();
        assert_eq!(index, 0);
        assert!(info.is_default);
        assert!(manager.device_by_name("microphone").is_none());
    }

    #[test]
    fn test_summary_tracks_buffer() {
        let manager = manager();
        let id = manager.open_output(0, 48000, 2, INT16);
        let buffer = manager.buffer(SessionId(id as u32)).unwrap();
        buffer.push(AudioFrame::silence(16, 2, 0, 0));
        buffer.push(AudioFrame::silence(16, 2, 0, 1));

        let summary = manager.summary(SessionId(id as u32)).unwrap();
        assert_eq!(summary.buffered_frames, 2);
        assert_eq!(summary.buffer_capacity, 64);
    }
}
