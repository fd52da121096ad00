//! Key/value media format descriptions.
//!
//! A [`Format`] is what the client hands to `configure`/`set_parameter` and
//! what `on_output_format_changed` reports back. Values are loosely typed;
//! [`CodecConfig`](crate::config::CodecConfig) does the validation.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use media_codec_types::PixelFormat;
use serde::{Deserialize, Serialize};

/// Recognized format keys.
pub mod keys {
    pub const WIDTH: &str = "width";
    pub const HEIGHT: &str = "height";
    pub const MAX_INPUT_BUFFER_COUNT: &str = "max-input-buffer-count";
    pub const MAX_OUTPUT_BUFFER_COUNT: &str = "max-output-buffer-count";
    pub const PIXEL_FORMAT: &str = "pixel-format";
    pub const ROTATION_ANGLE: &str = "rotation-angle";
    pub const SCALE_TYPE: &str = "scale-type";
    pub const BITRATE: &str = "bitrate";
    pub const FRAME_RATE: &str = "frame-rate";
    pub const MAX_INPUT_SIZE: &str = "max-input-size";
    pub const SAMPLE_RATE: &str = "sample-rate";
    pub const CHANNEL_COUNT: &str = "channel-count";
    /// Reported only: row stride of output frames.
    pub const STRIDE: &str = "stride";
    /// Reported only: bits per sample of output frames.
    pub const BIT_DEPTH: &str = "bit-depth";
}

/// A single format value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FormatValue {
    Int(i64),
    Float(f64),
    Str(String),
}

impl FormatValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            FormatValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Integers are accepted where a float is expected.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            FormatValue::Float(v) => Some(*v),
            FormatValue::Int(v) => Some(*v as f64),
            FormatValue::Str(_) => None,
        }
    }
}

/// Ordered map of format keys to values.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Format {
    entries: BTreeMap<String, FormatValue>,
}

impl Format {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style integer insert.
    pub fn with_int(mut self, key: &str, value: i64) -> Self {
        self.set_int(key, value);
        self
    }

    pub fn with_float(mut self, key: &str, value: f64) -> Self {
        self.set_float(key, value);
        self
    }

    pub fn set_int(&mut self, key: &str, value: i64) {
        self.entries.insert(key.to_string(), FormatValue::Int(value));
    }

    pub fn set_float(&mut self, key: &str, value: f64) {
        self.entries
            .insert(key.to_string(), FormatValue::Float(value));
    }

    pub fn set_str(&mut self, key: &str, value: impl Into<String>) {
        self.entries
            .insert(key.to_string(), FormatValue::Str(value.into()));
    }

    pub fn get(&self, key: &str) -> Option<&FormatValue> {
        self.entries.get(key)
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(FormatValue::as_int)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FormatValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parse a flat TOML table, e.g. a stored track description.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("parse format toml")
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("parse format json")
    }
}

/// Geometry currently negotiated between engine and output pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutputFormat {
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub pixel_format: PixelFormat,
    pub bit_depth: u8,
}

/// Row alignment of output frames.
pub const STRIDE_ALIGN: u32 = 16;

pub fn align_up(value: u32, align: u32) -> u32 {
    value.div_ceil(align) * align
}

impl OutputFormat {
    pub fn new(width: u32, height: u32, pixel_format: PixelFormat) -> Self {
        Self {
            width,
            height,
            stride: align_up(width, STRIDE_ALIGN),
            pixel_format,
            bit_depth: pixel_format.bit_depth(),
        }
    }

    /// Bytes required to hold one frame.
    pub fn frame_size(&self) -> usize {
        self.pixel_format.frame_size(self.stride, self.height)
    }

    /// `true` when geometry, pixel layout or depth differ; these force a
    /// reallocation and a format-change notification.
    pub fn differs_from(&self, other: &OutputFormat) -> bool {
        self.width != other.width
            || self.height != other.height
            || self.pixel_format != other.pixel_format
            || self.bit_depth != other.bit_depth
    }

    pub fn to_format(&self) -> Format {
        Format::new()
            .with_int(keys::WIDTH, self.width as i64)
            .with_int(keys::HEIGHT, self.height as i64)
            .with_int(keys::STRIDE, self.stride as i64)
            .with_int(keys::PIXEL_FORMAT, self.pixel_format.id())
            .with_int(keys::BIT_DEPTH, self.bit_depth as i64)
    }
}
