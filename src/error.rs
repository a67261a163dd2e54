//! Error types for the session registry

use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Session lifecycle errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Invalid session id: {0}")]
    InvalidId(i64),

    #[error("Session not found: {0}")]
    NotFound(u32),

    #[error("Session allocation failed for id {id}: {reason}")]
    AllocationFailed { id: u32, reason: String },

    #[error("Session {id} cannot {operation} while {status}")]
    InvalidState {
        id: u32,
        operation: &'static str,
        status: &'static str,
    },
}

/// Errors reported by an audio engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to spawn worker: {0}")]
    WorkerSpawn(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

impl SessionError {
    /// Lookup misses are benign: the caller treats them as "nothing to do"
    pub fn is_benign(&self) -> bool {
        matches!(self, SessionError::NotFound(_) | SessionError::InvalidId(_))
    }
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
