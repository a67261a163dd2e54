//! Value types shared between callers, sessions and audio engines
//!
//! Includes the device property record: the small structured description an
//! engine returns for a device index, serialized as a JSON object.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Stream direction, fixed when a session is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Input,
    Output,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Input => "input",
            Direction::Output => "output",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sample format of an audio stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SampleFormat {
    Int8,
    #[default]
    Int16,
    Int24,
    Int32,
    Int64,
    Float,
    Double,
    Unknown,
}

impl SampleFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            SampleFormat::Int8 => "int8",
            SampleFormat::Int16 => "int16",
            SampleFormat::Int24 => "int24",
            SampleFormat::Int32 => "int32",
            SampleFormat::Int64 => "int64",
            SampleFormat::Float => "float",
            SampleFormat::Double => "double",
            SampleFormat::Unknown => "unknown",
        }
    }

    /// Storage size of one sample, 0 when unknown
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleFormat::Int8 => 1,
            SampleFormat::Int16 => 2,
            SampleFormat::Int24 => 3,
            SampleFormat::Int32 | SampleFormat::Float => 4,
            SampleFormat::Int64 | SampleFormat::Double => 8,
            SampleFormat::Unknown => 0,
        }
    }
}

impl FromStr for SampleFormat {
    type Err = std::convert::Infallible;

    /// Unrecognized names map to `Unknown` rather than failing
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "int8" => SampleFormat::Int8,
            "int16" => SampleFormat::Int16,
            "int24" => SampleFormat::Int24,
            "int32" => SampleFormat::Int32,
            "int64" => SampleFormat::Int64,
            "float" => SampleFormat::Float,
            "double" => SampleFormat::Double,
            _ => SampleFormat::Unknown,
        })
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Speaker position of one channel in a device layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Channel {
    FrontLeft,
    FrontCenter,
    FrontRight,
    RearLeft,
    RearCenter,
    RearRight,
    SurroundLeft,
    SurroundRight,
    SubWoofer,
    Lfe,
    Unknown,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::FrontLeft => "front-left",
            Channel::FrontCenter => "front-center",
            Channel::FrontRight => "front-right",
            Channel::RearLeft => "rear-left",
            Channel::RearCenter => "rear-center",
            Channel::RearRight => "rear-right",
            Channel::SurroundLeft => "surround-left",
            Channel::SurroundRight => "surround-right",
            Channel::SubWoofer => "sub-woofer",
            Channel::Lfe => "lfe",
            Channel::Unknown => "unknown",
        }
    }

    /// Default layout for a channel count
    pub fn layout(count: u16) -> Vec<Channel> {
        match count {
            0 => Vec::new(),
            1 => vec![Channel::FrontCenter],
            2 => vec![Channel::FrontLeft, Channel::FrontRight],
            n => {
                let mut layout = vec![Channel::FrontLeft, Channel::FrontRight];
                layout.extend(std::iter::repeat(Channel::Unknown).take(n as usize - 2));
                layout
            }
        }
    }
}

impl FromStr for Channel {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "front-left" => Channel::FrontLeft,
            "front-center" => Channel::FrontCenter,
            "front-right" => Channel::FrontRight,
            "rear-left" => Channel::RearLeft,
            "rear-center" => Channel::RearCenter,
            "rear-right" => Channel::RearRight,
            "surround-left" => Channel::SurroundLeft,
            "surround-right" => Channel::SurroundRight,
            "sub-woofer" => Channel::SubWoofer,
            "lfe" => Channel::Lfe,
            _ => Channel::Unknown,
        })
    }
}

/// Configuration captured when a session is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamParams {
    pub device_index: u32,
    pub sample_rate: u32,
    pub channels: u16,
    pub format: SampleFormat,
}

impl StreamParams {
    pub fn new(device_index: u32, sample_rate: u32, channels: u16, format: SampleFormat) -> Self {
        Self {
            device_index,
            sample_rate,
            channels,
            format,
        }
    }

    /// Wall-clock duration of `frames` frames at this sample rate
    pub fn frames_duration(&self, frames: usize) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(frames as u64 * 1_000_000 / self.sample_rate as u64)
    }
}

/// Capability description of a device
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    /// The description was produced by a successful query
    pub is_correct: bool,
    /// true for an input device, false for output
    pub input: bool,
    pub name: String,
    pub desc: String,
    pub channels: Vec<Channel>,
    pub sample_rates: Vec<u32>,
    pub native_formats: Vec<SampleFormat>,
    pub is_default: bool,
}

/// Serialized shape of [`DeviceInfo`]
#[derive(Debug, Default, Serialize, Deserialize)]
struct PropertyRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    desc: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
    #[serde(rename = "sample-rate", default, skip_serializing_if = "Option::is_none")]
    sample_rates: Option<Vec<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    channels: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    format: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    default: Option<bool>,
}

impl DeviceInfo {
    /// Empty description returned for unknown devices
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        !self.is_correct
    }

    pub fn direction(&self) -> Direction {
        if self.input {
            Direction::Input
        } else {
            Direction::Output
        }
    }

    /// Encode as a property record; an empty description encodes as `{}`
    pub fn to_property(&self) -> String {
        if self.is_empty() {
            return "{}".to_string();
        }
        let record = PropertyRecord {
            name: Some(self.name.clone()),
            desc: (!self.desc.is_empty()).then(|| self.desc.clone()),
            kind: Some(self.direction().as_str().to_string()),
            sample_rates: Some(self.sample_rates.clone()),
            channels: Some(self.channels.iter().map(|c| c.as_str().to_string()).collect()),
            format: Some(self.native_formats.iter().map(|f| f.as_str().to_string()).collect()),
            default: Some(self.is_default),
        };
        serde_json::to_string(&record).unwrap_or_else(|_| "{}".to_string())
    }

    /// Decode a property record
    ///
    /// Malformed text and `{}` decode to an empty description. Missing
    /// fields take defaults: name `no-name`, output direction, empty lists,
    /// not default.
    pub fn from_property(text: &str) -> Self {
        let record: PropertyRecord = match serde_json::from_str(text) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!("Malformed device property: {}", e);
                return Self::empty();
            }
        };

        let is_blank = record.name.is_none()
            && record.kind.is_none()
            && record.sample_rates.is_none()
            && record.channels.is_none()
            && record.format.is_none()
            && record.default.is_none();
        if is_blank {
            return Self::empty();
        }

        Self {
            is_correct: true,
            input: record.kind.as_deref() == Some("input"),
            name: record.name.unwrap_or_else(|| "no-name".to_string()),
            desc: record.desc.unwrap_or_default(),
            channels: record
                .channels
                .unwrap_or_default()
                .iter()
                .map(|c| c.parse().unwrap_or(Channel::Unknown))
                .collect(),
            sample_rates: record.sample_rates.unwrap_or_default(),
            native_formats: record
                .format
                .unwrap_or_default()
                .iter()
                .map(|f| f.parse().unwrap_or(SampleFormat::Unknown))
                .collect(),
            is_default: record.default.unwrap_or(false),
        }
    }
}
