//! Boundary to the opaque compression/decompression engine.
//!
//! An engine is driven from two threads (input and output worker) but never
//! concurrently: the session serializes every call under one engine-access
//! mutex. Engines are produced by an [`EngineFactory`] registered in an
//! [`EngineRegistry`](crate::registry::EngineRegistry).

use media_codec_types::{CodecKind, ErrorKind, PixelFormat};

use crate::config::CodecConfig;
use crate::error::{CodecError, Result};
use crate::pool::BufferFlags;

/// Failure reported by an engine call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineFault {
    pub kind: ErrorKind,
    /// Engine-specific code forwarded to `on_error`.
    pub code: i32,
    pub reason: String,
}

impl EngineFault {
    pub fn new(kind: ErrorKind, code: i32, reason: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            reason: reason.into(),
        }
    }

    /// Recoverable engine failure.
    pub fn internal(code: i32, reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::InternalEngineError, code, reason)
    }
}

impl From<EngineFault> for CodecError {
    fn from(fault: EngineFault) -> Self {
        match fault.kind {
            ErrorKind::InvalidState => CodecError::invalid_state("engine", fault.reason),
            ErrorKind::InvalidValue => CodecError::InvalidValue(fault.reason),
            ErrorKind::NoMemory => CodecError::NoMemory(fault.reason),
            ErrorKind::Unsupported => CodecError::Unsupported(fault.reason),
            ErrorKind::InternalEngineError => CodecError::InternalEngine {
                code: fault.code,
                reason: fault.reason,
            },
            ErrorKind::Unknown => CodecError::Unknown(fault.reason),
        }
    }
}

/// Result of a `send` or `receive` call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineStatus {
    Ok,
    EndOfStream,
    /// Send: packet is partial and must be merged with the next one.
    /// Receive: nothing decoded yet; slot goes back unfilled.
    NotEnoughData,
    /// Engine is full (send) or has nothing ready (receive); retry later.
    TryAgain,
    Error(EngineFault),
}

/// Compressed input handed to [`CodecEngine::send`].
#[derive(Debug)]
pub struct SendDescriptor<'a> {
    /// Slot the payload came from. For merged packets, the last slot.
    pub index: usize,
    pub data: &'a [u8],
    pub pts: i64,
    pub flags: BufferFlags,
}

impl SendDescriptor<'_> {
    pub fn is_eos(&self) -> bool {
        self.flags.contains(BufferFlags::EOS)
    }
}

/// Geometry of a decoded frame as reported by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameGeometry {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
}

/// Metadata of the frame produced by [`CodecEngine::receive`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameInfo {
    pub pts: i64,
    /// Payload size in bytes.
    pub size: usize,
    pub flags: BufferFlags,
    /// Set by video engines on every frame.
    pub geometry: Option<FrameGeometry>,
}

/// An opaque codec implementation.
pub trait CodecEngine: Send {
    /// Prepare for a validated configuration.
    fn open(&mut self, config: &CodecConfig) -> Result<()>;

    /// Drop all buffered stream state.
    fn flush(&mut self) -> Result<()>;

    /// Release engine resources. Called once on session release.
    fn close(&mut self);

    /// Submit one compressed packet.
    fn send(&mut self, input: &SendDescriptor<'_>) -> EngineStatus;

    /// Fetch the next decoded frame's metadata. On `Ok` the frame stays
    /// pending until [`copy_frame`](Self::copy_frame).
    fn receive(&mut self, info: &mut FrameInfo) -> EngineStatus;

    /// Write the pending frame into `dst`, returning the bytes written.
    fn copy_frame(&mut self, dst: &mut [u8]) -> Result<usize>;

    /// Runtime parameter update (bitrate, frame rate, ...).
    fn set_parameter(&mut self, _config: &CodecConfig) -> Result<()> {
        Ok(())
    }
}

/// What an engine implementation can handle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineCapability {
    /// Engine name, e.g. `"soft.hevc"`.
    pub name: String,
    /// MIME type handled, e.g. `"video/hevc"`.
    pub mime: String,
    pub kind: CodecKind,
    pub hardware: bool,
    pub max_width: u32,
    pub max_height: u32,
}

/// Creates engines for one capability.
pub trait EngineFactory: Send + Sync {
    fn capability(&self) -> &EngineCapability;
    fn create(&self) -> Result<Box<dyn CodecEngine>>;
}
