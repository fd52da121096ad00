//! Asynchronous buffer-exchange engine for audio and video codecs.
//!
//! A [`CodecSession`] coordinates a client ([`ClientCallback`]), an opaque
//! [`CodecEngine`] and optionally a [`DisplayQueue`] over fixed pools of
//! indexed buffer slots. Two worker threads move slots between the parties;
//! every slot carries an ownership tag naming the only party that may touch it.

pub mod callback;
pub mod config;
pub mod display;
pub mod engine;
pub mod error;
pub mod format;
pub mod pool;
pub mod queue;
pub mod registry;
pub mod session;
pub mod state;
pub mod status;
mod worker;

pub use callback::ClientCallback;
pub use config::{CodecConfig, SessionOptions};
pub use display::{DisplayEvent, DisplayQueue, FlushConfig, GraphicBuffer, ReleaseListener};
pub use engine::{
    CodecEngine, EngineCapability, EngineFactory, EngineFault, EngineStatus, FrameGeometry,
    FrameInfo, SendDescriptor,
};
pub use error::{CodecError, DisplayError, Result};
pub use format::{Format, FormatValue, OutputFormat, keys};
pub use pool::{BufferAttr, BufferFlags, CodecBuffer, Owner};
pub use registry::{EngineRegistry, InstanceLease, InstanceRegistry};
pub use session::CodecSession;
pub use state::CodecState;

pub use media_codec_types::{
    CodecKind, CodecStateLabel, ErrorKind, PixelFormat, Rotation, ScaleType, SessionStatus,
};
