//! Codec configuration and worker tuning.
//!
//! [`CodecConfig`] is the validated form of a client [`Format`]. Geometry and
//! enum keys fail the call when invalid; counts, sizes and rates are clamped
//! with a warning; unknown keys are dropped with a warning.
//!
//! [`SessionOptions`] tunes the worker threads and can be loaded from TOML.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use media_codec_types::{CodecKind, PixelFormat, Rotation, ScaleType};
use serde::{Deserialize, Serialize};

use crate::error::{CodecError, Result};
use crate::format::{Format, FormatValue, OutputFormat, keys};

pub const MIN_DIMENSION: i64 = 2;
pub const MAX_DIMENSION: i64 = 8192;
pub const MIN_BUFFER_COUNT: usize = 2;
pub const MAX_BUFFER_COUNT: usize = 30;
pub const DEFAULT_INPUT_BUFFER_COUNT: usize = 4;
pub const DEFAULT_OUTPUT_BUFFER_COUNT: usize = 3;
pub const MAX_BITRATE: i64 = 1_000_000_000;
pub const MAX_FRAME_RATE: f64 = 240.0;
pub const DEFAULT_AUDIO_INPUT_SIZE: usize = 8192;
pub const MIN_INPUT_SIZE: i64 = 1024;
pub const MAX_INPUT_SIZE: i64 = 64 * 1024 * 1024;
/// Output slot size for audio sessions, in bytes.
pub const AUDIO_OUTPUT_SIZE: usize = 32 * 1024;

/// Upper bound for every worker wait.
pub const MAX_WAIT_MS: u64 = 500;

/// Validated codec configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct CodecConfig {
    pub kind: CodecKind,
    /// Video geometry; zero for audio.
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub rotation: Rotation,
    pub scale_type: ScaleType,
    pub input_buffer_count: usize,
    pub output_buffer_count: usize,
    /// Byte size of each input slot; also the merge limit for partial frames.
    pub max_input_size: usize,
    pub bitrate: Option<u64>,
    pub frame_rate: Option<f64>,
    pub sample_rate: Option<u32>,
    pub channel_count: Option<u32>,
}

/// Keys accepted at configure time.
const CONFIGURE_KEYS: &[&str] = &[
    keys::WIDTH,
    keys::HEIGHT,
    keys::MAX_INPUT_BUFFER_COUNT,
    keys::MAX_OUTPUT_BUFFER_COUNT,
    keys::PIXEL_FORMAT,
    keys::ROTATION_ANGLE,
    keys::SCALE_TYPE,
    keys::BITRATE,
    keys::FRAME_RATE,
    keys::MAX_INPUT_SIZE,
    keys::SAMPLE_RATE,
    keys::CHANNEL_COUNT,
];

/// Keys that may change while streaming.
const RUNTIME_KEYS: &[&str] = &[
    keys::BITRATE,
    keys::FRAME_RATE,
    keys::ROTATION_ANGLE,
    keys::SCALE_TYPE,
];

fn int_value(format: &Format, key: &str) -> Result<Option<i64>> {
    match format.get(key) {
        None => Ok(None),
        Some(FormatValue::Int(v)) => Ok(Some(*v)),
        Some(other) => Err(CodecError::invalid_value(format!(
            "{key}: expected integer, got {other:?}"
        ))),
    }
}

fn float_value(format: &Format, key: &str) -> Result<Option<f64>> {
    match format.get(key) {
        None => Ok(None),
        Some(v) => v.as_float().map(Some).ok_or_else(|| {
            CodecError::invalid_value(format!("{key}: expected number, got {v:?}"))
        }),
    }
}

fn clamp_count(key: &str, value: i64) -> usize {
    let clamped = value.clamp(MIN_BUFFER_COUNT as i64, MAX_BUFFER_COUNT as i64);
    if clamped != value {
        tracing::warn!(key, value, clamped, "buffer count clamped");
    }
    clamped as usize
}

fn dimension(format: &Format, key: &str) -> Result<Option<u32>> {
    match int_value(format, key)? {
        None => Ok(None),
        Some(v) if (MIN_DIMENSION..=MAX_DIMENSION).contains(&v) => Ok(Some(v as u32)),
        Some(v) => Err(CodecError::invalid_value(format!(
            "{key} {v} outside [{MIN_DIMENSION}, {MAX_DIMENSION}]"
        ))),
    }
}

fn rotation(format: &Format) -> Result<Option<Rotation>> {
    match int_value(format, keys::ROTATION_ANGLE)? {
        None => Ok(None),
        Some(v) => Rotation::from_degrees(v)
            .map(Some)
            .ok_or_else(|| CodecError::invalid_value(format!("rotation-angle {v}"))),
    }
}

fn scale_type(format: &Format) -> Result<Option<ScaleType>> {
    match int_value(format, keys::SCALE_TYPE)? {
        None => Ok(None),
        Some(v) => ScaleType::from_id(v)
            .map(Some)
            .ok_or_else(|| CodecError::invalid_value(format!("scale-type {v}"))),
    }
}

fn bitrate(format: &Format) -> Result<Option<u64>> {
    Ok(int_value(format, keys::BITRATE)?.map(|v| {
        let clamped = v.clamp(1, MAX_BITRATE);
        if clamped != v {
            tracing::warn!(value = v, clamped, "bitrate clamped");
        }
        clamped as u64
    }))
}

fn frame_rate(format: &Format) -> Result<Option<f64>> {
    match float_value(format, keys::FRAME_RATE)? {
        None => Ok(None),
        Some(v) if !v.is_finite() => Err(CodecError::invalid_value("frame-rate is not finite")),
        Some(v) => {
            let clamped = v.clamp(1.0, MAX_FRAME_RATE);
            if clamped != v {
                tracing::warn!(value = v, clamped, "frame-rate clamped");
            }
            Ok(Some(clamped))
        }
    }
}

fn warn_dropped(format: &Format, accepted: &[&str]) -> Vec<String> {
    let dropped: Vec<String> = format
        .iter()
        .map(|(k, _)| k)
        .filter(|k| !accepted.contains(k))
        .map(str::to_string)
        .collect();
    for key in &dropped {
        tracing::warn!(key = %key, "unrecognized format key dropped");
    }
    dropped
}

impl CodecConfig {
    /// Validate a client format. Nothing is returned unless every checked key passed.
    pub fn from_format(kind: CodecKind, format: &Format) -> Result<Self> {
        let width = dimension(format, keys::WIDTH)?;
        let height = dimension(format, keys::HEIGHT)?;
        let (width, height) = match (kind, width, height) {
            (CodecKind::Video, Some(w), Some(h)) => (w, h),
            (CodecKind::Video, _, _) => {
                return Err(CodecError::invalid_value("video requires width and height"));
            }
            (CodecKind::Audio, w, h) => (w.unwrap_or(0), h.unwrap_or(0)),
        };

        let pixel_format = match int_value(format, keys::PIXEL_FORMAT)? {
            None => PixelFormat::Nv12,
            Some(v) => PixelFormat::from_id(v)
                .ok_or_else(|| CodecError::invalid_value(format!("pixel-format {v}")))?,
        };

        let sample_rate = match int_value(format, keys::SAMPLE_RATE)? {
            None => None,
            Some(v) if (8_000..=384_000).contains(&v) => Some(v as u32),
            Some(v) => return Err(CodecError::invalid_value(format!("sample-rate {v}"))),
        };
        let channel_count = match int_value(format, keys::CHANNEL_COUNT)? {
            None => None,
            Some(v) if (1..=16).contains(&v) => Some(v as u32),
            Some(v) => return Err(CodecError::invalid_value(format!("channel-count {v}"))),
        };

        let default_input_size = match kind {
            CodecKind::Video => OutputFormat::new(width, height, PixelFormat::Yuvi420).frame_size(),
            CodecKind::Audio => DEFAULT_AUDIO_INPUT_SIZE,
        };
        let max_input_size = match int_value(format, keys::MAX_INPUT_SIZE)? {
            None => default_input_size,
            Some(v) => {
                let clamped = v.clamp(MIN_INPUT_SIZE, MAX_INPUT_SIZE);
                if clamped != v {
                    tracing::warn!(value = v, clamped, "max-input-size clamped");
                }
                clamped as usize
            }
        };

        let config = Self {
            kind,
            width,
            height,
            pixel_format,
            rotation: rotation(format)?.unwrap_or_default(),
            scale_type: scale_type(format)?.unwrap_or_default(),
            input_buffer_count: int_value(format, keys::MAX_INPUT_BUFFER_COUNT)?
                .map(|v| clamp_count(keys::MAX_INPUT_BUFFER_COUNT, v))
                .unwrap_or(DEFAULT_INPUT_BUFFER_COUNT),
            output_buffer_count: int_value(format, keys::MAX_OUTPUT_BUFFER_COUNT)?
                .map(|v| clamp_count(keys::MAX_OUTPUT_BUFFER_COUNT, v))
                .unwrap_or(DEFAULT_OUTPUT_BUFFER_COUNT),
            max_input_size,
            bitrate: bitrate(format)?,
            frame_rate: frame_rate(format)?,
            sample_rate,
            channel_count,
        };
        warn_dropped(format, CONFIGURE_KEYS);
        Ok(config)
    }

    /// Apply runtime parameters to a copy; the original is untouched on error.
    ///
    /// Returns the updated config and the keys that were applied.
    pub fn with_parameters(&self, format: &Format) -> Result<(Self, Vec<&'static str>)> {
        let mut next = self.clone();
        let mut applied = Vec::new();
        if let Some(v) = bitrate(format)? {
            next.bitrate = Some(v);
            applied.push(keys::BITRATE);
        }
        if let Some(v) = frame_rate(format)? {
            next.frame_rate = Some(v);
            applied.push(keys::FRAME_RATE);
        }
        if let Some(v) = rotation(format)? {
            next.rotation = v;
            applied.push(keys::ROTATION_ANGLE);
        }
        if let Some(v) = scale_type(format)? {
            next.scale_type = v;
            applied.push(keys::SCALE_TYPE);
        }
        warn_dropped(format, RUNTIME_KEYS);
        Ok((next, applied))
    }

    /// Geometry the output pool starts with.
    pub fn output_format(&self) -> OutputFormat {
        OutputFormat::new(self.width, self.height, self.pixel_format)
    }

    /// Byte size of one output slot at the current geometry.
    pub fn output_buffer_size(&self, format: &OutputFormat) -> usize {
        match self.kind {
            CodecKind::Video => format.frame_size(),
            CodecKind::Audio => AUDIO_OUTPUT_SIZE,
        }
    }
}

/// Worker tuning knobs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    /// Park time after an engine "try again".
    pub try_again_wait_ms: u64,
    /// Sleep while the session is inactive.
    pub idle_wait_ms: u64,
    /// Consecutive output "not enough data" results before a stall warning.
    pub stall_warn_threshold: u32,
    /// Minimum usable slots per pool.
    pub min_buffers: usize,
    /// Capacity of the display release channel.
    pub display_event_capacity: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            try_again_wait_ms: 100,
            idle_wait_ms: 20,
            stall_warn_threshold: 50,
            min_buffers: MIN_BUFFER_COUNT,
            display_event_capacity: 64,
        }
    }
}

impl SessionOptions {
    /// Load options from a TOML file. Missing keys keep their defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read options {:?}", path))?;
        Self::from_toml_str(&raw).with_context(|| format!("parse options {:?}", path))
    }

    pub fn from_toml_str(raw: &str) -> anyhow::Result<Self> {
        let opts: SessionOptions = toml::from_str(raw)?;
        Ok(opts.normalized())
    }

    /// Clamp waits so no worker blocks longer than [`MAX_WAIT_MS`].
    pub fn normalized(mut self) -> Self {
        self.try_again_wait_ms = self.try_again_wait_ms.clamp(1, MAX_WAIT_MS);
        self.idle_wait_ms = self.idle_wait_ms.clamp(1, MAX_WAIT_MS);
        self.stall_warn_threshold = self.stall_warn_threshold.max(1);
        self.min_buffers = self.min_buffers.max(MIN_BUFFER_COUNT);
        self.display_event_capacity = self.display_event_capacity.max(MAX_BUFFER_COUNT);
        self
    }

    pub fn try_again_wait(&self) -> Duration {
        Duration::from_millis(self.try_again_wait_ms.min(MAX_WAIT_MS))
    }

    pub fn idle_wait(&self) -> Duration {
        Duration::from_millis(self.idle_wait_ms.min(MAX_WAIT_MS))
    }
}
