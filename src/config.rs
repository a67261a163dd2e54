//! Configuration loaded from TOML

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::Error;
use crate::protocol::{SampleFormat, StreamParams};

/// Name of the configuration file inside the platform config directory
pub const CONFIG_FILE_NAME: &str = "orchestra.toml";

/// Top-level application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub defaults: StreamDefaults,
    pub worker: WorkerConfig,
}

/// Which audio engine backs the manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Simulated devices, no hardware access
    #[default]
    Dummy,
    /// Hardware devices through cpal
    Cpal,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub kind: EngineKind,
}

/// Stream settings used when the caller does not provide its own
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamDefaults {
    pub device_index: u32,
    pub sample_rate: u32,
    pub channels: u16,
    pub format: SampleFormat,
}

impl Default for StreamDefaults {
    fn default() -> Self {
        Self {
            device_index: 0,
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            format: SampleFormat::Int16,
        }
    }
}

impl StreamDefaults {
    pub fn params(&self) -> StreamParams {
        StreamParams::new(self.device_index, self.sample_rate, self.channels, self.format)
    }
}

/// Transport worker tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Frames moved per worker period
    pub chunk_frames: usize,
    /// Sleep between liveness checks of a hardware worker
    pub poll_interval_ms: u64,
    /// Interval after which a stop re-checks worker termination
    pub stop_retry_ms: u64,
    /// Capacity of each session's frame buffer
    pub buffer_capacity: usize,
    /// How long a hardware start may take to report before it is abandoned
    pub start_timeout_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            chunk_frames: DEFAULT_CHUNK_FRAMES,
            poll_interval_ms: 10,
            stop_retry_ms: 500,
            buffer_capacity: RING_BUFFER_CAPACITY,
            start_timeout_ms: 5000,
        }
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn stop_retry(&self) -> Duration {
        Duration::from_millis(self.stop_retry_ms.max(1))
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms.max(1))
    }
}

impl AppConfig {
    /// Parse configuration from TOML text
    pub fn from_toml(text: &str) -> Result<Self, Error> {
        let config: AppConfig = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Write configuration to a file, creating parent directories
    pub fn save(&self, path: &Path) -> Result<(), Error> {
        let text = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Platform configuration file path, if a home directory is known
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("org", "musicdsp", "orchestra")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    /// Load from the platform path, falling back to defaults
    pub fn load_or_default() -> Self {
        let Some(path) = Self::default_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::load(&path) {
            Ok(config) => {
                tracing::info!("Loaded configuration from {}", path.display());
                config
            }
            Err(e) => {
                tracing::warn!("Ignoring configuration {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.worker.chunk_frames == 0 {
            return Err(Error::Config("worker.chunk_frames must be positive".into()));
        }
        if self.worker.buffer_capacity == 0 {
            return Err(Error::Config("worker.buffer_capacity must be positive".into()));
        }
        Ok(())
    }
}
