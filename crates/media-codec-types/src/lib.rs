use serde::{Deserialize, Serialize};

/// Media family handled by a codec session.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CodecKind {
    /// Compressed audio in, PCM out (or the reverse for encoders).
    Audio,
    /// Compressed video in, raw frames out (or the reverse for encoders).
    Video,
}

/// Error class reported to clients through `on_error`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Operation not allowed in the current lifecycle state.
    InvalidState,
    /// Argument or configuration value rejected.
    InvalidValue,
    /// Buffer or instance allocation failed.
    NoMemory,
    /// Feature or stream not supported by the engine.
    Unsupported,
    /// Engine reported a failure it may recover from.
    InternalEngineError,
    /// Anything the engine could not classify.
    Unknown,
}

impl ErrorKind {
    /// Whether a worker seeing this kind must move the session into `Error`.
    pub fn is_unrecoverable(self) -> bool {
        matches!(
            self,
            ErrorKind::Unknown | ErrorKind::Unsupported | ErrorKind::NoMemory
        )
    }
}

/// Lifecycle state label exposed in status snapshots.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CodecStateLabel {
    Uninitialized,
    Initialized,
    Configured,
    Running,
    Flushing,
    Flushed,
    Stopping,
    Eos,
    Paused,
    Error,
}

/// Raw pixel layouts an output slot can carry.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    Yuvi420,
    Nv12,
    Nv21,
    Rgba,
    /// 10-bit semi-planar, two bytes per sample.
    P010,
}

impl PixelFormat {
    /// Numeric id used by the `pixel-format` configuration key.
    pub fn from_id(id: i64) -> Option<Self> {
        match id {
            1 => Some(PixelFormat::Yuvi420),
            2 => Some(PixelFormat::Nv12),
            3 => Some(PixelFormat::Nv21),
            5 => Some(PixelFormat::Rgba),
            6 => Some(PixelFormat::P010),
            _ => None,
        }
    }

    pub fn id(self) -> i64 {
        match self {
            PixelFormat::Yuvi420 => 1,
            PixelFormat::Nv12 => 2,
            PixelFormat::Nv21 => 3,
            PixelFormat::Rgba => 5,
            PixelFormat::P010 => 6,
        }
    }

    /// Bytes needed for one frame of `stride` x `height`.
    pub fn frame_size(self, stride: u32, height: u32) -> usize {
        let luma = stride as usize * height as usize;
        match self {
            PixelFormat::Yuvi420 | PixelFormat::Nv12 | PixelFormat::Nv21 => luma * 3 / 2,
            PixelFormat::Rgba => luma * 4,
            PixelFormat::P010 => luma * 3,
        }
    }

    /// Bit depth per sample.
    pub fn bit_depth(self) -> u8 {
        match self {
            PixelFormat::P010 => 10,
            _ => 8,
        }
    }
}

/// Display rotation applied when frames are rendered.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Rotation {
    #[default]
    None,
    Rotate90,
    Rotate180,
    Rotate270,
}

impl Rotation {
    /// Parse a `rotation-angle` value in degrees.
    pub fn from_degrees(degrees: i64) -> Option<Self> {
        match degrees {
            0 => Some(Rotation::None),
            90 => Some(Rotation::Rotate90),
            180 => Some(Rotation::Rotate180),
            270 => Some(Rotation::Rotate270),
            _ => None,
        }
    }

    pub fn degrees(self) -> i64 {
        match self {
            Rotation::None => 0,
            Rotation::Rotate90 => 90,
            Rotation::Rotate180 => 180,
            Rotation::Rotate270 => 270,
        }
    }
}

/// How the display fits a frame into its window.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ScaleType {
    #[default]
    ScaleToWindow,
    ScaleCrop,
}

impl ScaleType {
    /// Parse a `scale-type` value.
    pub fn from_id(id: i64) -> Option<Self> {
        match id {
            1 => Some(ScaleType::ScaleToWindow),
            2 => Some(ScaleType::ScaleCrop),
            _ => None,
        }
    }

    pub fn id(self) -> i64 {
        match self {
            ScaleType::ScaleToWindow => 1,
            ScaleType::ScaleCrop => 2,
        }
    }
}

/// Point-in-time status of a codec session.
///
/// Counters are cumulative since the session was created.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionStatus {
    /// Engine name resolved at construction.
    pub engine: String,
    pub kind: CodecKind,
    pub state: CodecStateLabel,
    /// Negotiated output width, if video.
    pub width: Option<u32>,
    /// Negotiated output height, if video.
    pub height: Option<u32>,
    /// `true` when output is rendered to a display queue.
    pub display_mode: bool,
    pub input_buffers: usize,
    pub output_buffers: usize,
    pub inputs_queued: u64,
    pub inputs_sent: u64,
    pub outputs_delivered: u64,
    pub outputs_rendered: u64,
    pub display_releases: u64,
    pub format_changes: u64,
    pub try_again_waits: u64,
    pub output_stalls: u64,
    pub errors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_format_ids_round_trip_known_values() {
        for fmt in [
            PixelFormat::Yuvi420,
            PixelFormat::Nv12,
            PixelFormat::Nv21,
            PixelFormat::Rgba,
            PixelFormat::P010,
        ] {
            assert_eq!(PixelFormat::from_id(fmt.id()), Some(fmt));
        }
        assert_eq!(PixelFormat::from_id(4), None);
    }

    #[test]
    fn frame_size_accounts_for_chroma_and_depth() {
        assert_eq!(PixelFormat::Nv12.frame_size(16, 16), 384);
        assert_eq!(PixelFormat::Rgba.frame_size(16, 16), 1024);
        assert_eq!(PixelFormat::P010.frame_size(16, 16), 768);
        assert_eq!(PixelFormat::P010.bit_depth(), 10);
    }

    #[test]
    fn rotation_rejects_odd_angles() {
        assert_eq!(Rotation::from_degrees(90), Some(Rotation::Rotate90));
        assert_eq!(Rotation::from_degrees(45), None);
    }

    #[test]
    fn unrecoverable_kinds() {
        assert!(ErrorKind::Unknown.is_unrecoverable());
        assert!(ErrorKind::Unsupported.is_unrecoverable());
        assert!(!ErrorKind::InternalEngineError.is_unrecoverable());
    }

    #[test]
    fn state_label_serializes_snake_case() {
        let json = serde_json::to_string(&CodecStateLabel::Eos).unwrap();
        assert_eq!(json, "\"eos\"");
    }
}
