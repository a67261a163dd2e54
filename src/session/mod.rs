//! A single open audio stream and its lifecycle status

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::audio::SharedRingBuffer;
use crate::engine::{EngineStream, StopHandle};
use crate::error::{Error, SessionError};
use crate::protocol::{Direction, StreamParams};

/// Process-unique session identifier
///
/// Identifiers are handed to hosts as `i32`, so they never exceed
/// [`SessionId::MAX`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u32);

impl SessionId {
    pub const MAX: u32 = i32::MAX as u32;

    /// Convert a host identifier; negative values name no session
    pub fn from_raw(raw: i32) -> Option<Self> {
        u32::try_from(raw).ok().map(SessionId)
    }

    pub fn to_raw(self) -> i32 {
        self.0.min(Self::MAX) as i32
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status
///
/// Moves forward only: `Opened -> Running -> Stopping -> Stopped`, with
/// `Opened -> Stopped` for sessions that never started. `Stopping` lasts
/// from the terminate signal until the worker is confirmed gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Opened,
    Running,
    Stopping,
    Stopped,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Opened => "opened",
            SessionStatus::Running => "running",
            SessionStatus::Stopping => "stopping",
            SessionStatus::Stopped => "stopped",
        }
    }

    /// A worker may still be touching the device
    pub fn is_active(&self) -> bool {
        matches!(self, SessionStatus::Running | SessionStatus::Stopping)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub direction: Direction,
    pub params: StreamParams,
    pub status: SessionStatus,
    pub frames_transported: u64,
    /// Frames waiting in the session's ring buffer
    pub buffered_frames: usize,
    pub buffer_capacity: usize,
}

/// An open stream, owning its engine stream until closed
pub struct Session {
    id: SessionId,
    direction: Direction,
    params: StreamParams,
    status: SessionStatus,
    buffer: SharedRingBuffer,
    /// `None` once closed
    stream: Option<Box<dyn EngineStream>>,
    released_frames: u64,
}

impl Session {
    pub fn new(
        id: SessionId,
        direction: Direction,
        params: StreamParams,
        buffer: SharedRingBuffer,
        stream: Box<dyn EngineStream>,
    ) -> Self {
        Self {
            id,
            direction,
            params,
            status: SessionStatus::Opened,
            buffer,
            stream: Some(stream),
            released_frames: 0,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn params(&self) -> &StreamParams {
        &self.params
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn buffer(&self) -> &SharedRingBuffer {
        &self.buffer
    }

    pub fn frames_transported(&self) -> u64 {
        self.stream
            .as_ref()
            .map_or(self.released_frames, |s| s.frames_transported())
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id,
            direction: self.direction,
            params: self.params,
            status: self.status,
            frames_transported: self.frames_transported(),
            buffered_frames: self.buffer.len(),
            buffer_capacity: self.buffer.capacity(),
        }
    }

    fn invalid(&self, operation: &'static str) -> Error {
        SessionError::InvalidState {
            id: self.id.0,
            operation,
            status: self.status.as_str(),
        }
        .into()
    }

    /// Begin transport. Starting a running session is a no-op.
    pub fn start(&mut self) -> Result<(), Error> {
        match self.status {
            SessionStatus::Opened => {
                let Some(stream) = self.stream.as_mut() else {
                    return Err(self.invalid("start"));
                };
                stream.start()?;
                self.status = SessionStatus::Running;
                Ok(())
            }
            SessionStatus::Running => Ok(()),
            SessionStatus::Stopping | SessionStatus::Stopped => Err(self.invalid("start")),
        }
    }

    /// First half of a stop: signal the worker and return the handle to wait
    /// on. Waiting happens with no lock held.
    pub fn begin_stop(&mut self) -> StopHandle {
        match self.status {
            SessionStatus::Opened | SessionStatus::Stopped => {
                self.status = SessionStatus::Stopped;
                StopHandle::completed(format!("session-{}", self.id))
            }
            SessionStatus::Running | SessionStatus::Stopping => {
                self.status = SessionStatus::Stopping;
                self.stream
                    .as_mut()
                    .and_then(|s| s.auto_stop())
                    .unwrap_or_else(|| StopHandle::completed(format!("session-{}", self.id)))
            }
        }
    }

    /// Second half of a stop, once the worker is confirmed terminated
    pub fn finish_stop(&mut self) {
        if self.status == SessionStatus::Stopping {
            self.status = SessionStatus::Stopped;
        }
    }

    /// Stop and wait in one call, for sessions no longer shared
    pub fn stop(&mut self, retry: Duration) {
        self.begin_stop().wait(retry);
        self.finish_stop();
    }

    /// Stop a still-active worker, then release the engine stream
    ///
    /// The session ends `Stopped` with no stream; closing again does nothing.
    pub fn close(&mut self, retry: Duration) {
        if self.status.is_active() {
            tracing::info!("Session {} closed while {}, stopping first", self.id, self.status);
            self.stop(retry);
        }
        self.status = SessionStatus::Stopped;

        // the engine stream is released exactly once, here
        if let Some(stream) = self.stream.take() {
            self.released_frames = stream.frames_transported();
            tracing::debug!(
                "Releasing {} stream of session {} after {} frames",
                self.direction,
                self.id,
                self.released_frames
            );
            drop(stream);
        }
        if !self.buffer.is_empty() {
            tracing::debug!(
                "Session {} closed with {} frames still buffered",
                self.id,
                self.buffer.len()
            );
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("direction", &self.direction)
            .field("params", &self.params)
            .field("status", &self.status)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{create_shared_buffer, AudioFrame};
    use crate::error::EngineError;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Stream without a worker that records how it was driven
    #[derive(Default)]
    struct StreamLog {
        started: AtomicUsize,
        stopped: AtomicUsize,
        released: AtomicBool,
    }

    struct LoggedStream(Arc<StreamLog>, bool);

    impl EngineStream for LoggedStream {
        fn start(&mut self) -> Result<(), EngineError> {
            self.0.started.fetch_add(1, Ordering::SeqCst);
            self.1 = true;
            Ok(())
        }

        fn auto_stop(&mut self) -> Option<StopHandle> {
            self.0.stopped.fetch_add(1, Ordering::SeqCst);
            self.1 = false;
            Some(StopHandle::completed("logged"))
        }

        fn is_running(&self) -> bool {
            self.1
        }

        fn frames_transported(&self) -> u64 {
            0
        }
    }

    impl Drop for LoggedStream {
        fn drop(&mut self) {
            assert!(!self.0.released.swap(true, Ordering::SeqCst), "released twice");
        }
    }

    fn session(log: &Arc<StreamLog>) -> Session {
        Session::new(
            SessionId(4),
            Direction::Output,
            StreamParams::new(0, 48000, 2, Default::default()),
            create_shared_buffer(4),
            Box::new(LoggedStream(log.clone(), false)),
        )
    }

    #[test]
    fn test_raw_id_conversion() {
        assert_eq!(SessionId::from_raw(-1), None);
        assert_eq!(SessionId::from_raw(0), Some(SessionId(0)));
        assert_eq!(SessionId(12).to_raw(), 12);
        assert_eq!(SessionId(u32::MAX).to_raw(), i32::MAX);
    }

    #[test]
    fn test_status_progression() {
        let log = Arc::new(StreamLog::default());
        let mut session = session(&log);
        assert_eq!(session.status(), SessionStatus::Opened);

        session.start().unwrap();
        session.start().unwrap();
        assert_eq!(log.started.load(Ordering::SeqCst), 1);
        assert_eq!(session.status(), SessionStatus::Running);

        let handle = session.begin_stop();
        assert_eq!(session.status(), SessionStatus::Stopping);
        assert!(session.start().is_err());
        handle.wait(Duration::from_millis(1));
        session.finish_stop();
        assert_eq!(session.status(), SessionStatus::Stopped);
        assert!(matches!(
            session.start(),
            Err(Error::Session(SessionError::InvalidState { operation: "start", .. }))
        ));
    }

    #[test]
    fn test_stop_unstarted_session() {
        let log = Arc::new(StreamLog::default());
        let mut session = session(&log);
        session.stop(Duration::from_millis(1));
        assert_eq!(session.status(), SessionStatus::Stopped);
        assert_eq!(log.stopped.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_close_running_session_stops_first() {
        let log = Arc::new(StreamLog::default());
        let mut session = session(&log);
        session.start().unwrap();
        session.close(Duration::from_millis(1));
        assert_eq!(log.stopped.load(Ordering::SeqCst), 1);
        assert!(log.released.load(Ordering::SeqCst));
        assert!(session.is_closed());
        assert_eq!(session.status(), SessionStatus::Stopped);
    }

    #[test]
    fn test_closed_session_stays_closed() {
        let log = Arc::new(StreamLog::default());
        let mut session = session(&log);
        session.close(Duration::from_millis(1));
        // a second close must not release the stream again
        session.close(Duration::from_millis(1));
        session.stop(Duration::from_millis(1));
        assert!(matches!(
            session.start(),
            Err(Error::Session(SessionError::InvalidState { operation: "start", .. }))
        ));
        assert_eq!(log.started.load(Ordering::SeqCst), 0);
        assert_eq!(log.stopped.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_summary_reports_buffer_fill() {
        let log = Arc::new(StreamLog::default());
        let session = session(&log);
        session.buffer().push(AudioFrame::silence(8, 2, 0, 0));
        let summary = session.summary();
        assert_eq!(summary.buffered_frames, 1);
        assert_eq!(summary.buffer_capacity, 4);
        assert_eq!(summary.status, SessionStatus::Opened);
    }
}
