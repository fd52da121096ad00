//! Error types for the codec engine.
//!
//! Lifecycle and client-facing calls return [`CodecError`]. Failures raised by a
//! display collaborator use [`DisplayError`]; they are usually logged and only
//! surface to the caller during a live display replacement.

use media_codec_types::ErrorKind;

/// Errors returned by session operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Operation is not allowed in the current state.
    #[error("invalid state: {op} not allowed while {state}")]
    InvalidState {
        /// Operation that was rejected.
        op: &'static str,
        /// State label at the time of the call.
        state: String,
    },

    /// An argument or configuration value was rejected.
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// Buffer, merge or instance allocation failed.
    #[error("no memory: {0}")]
    NoMemory(String),

    /// Requested feature is not supported.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// The engine reported a failure.
    #[error("engine error (code {code}): {reason}")]
    InternalEngine {
        /// Engine-specific error code.
        code: i32,
        /// Human-readable description.
        reason: String,
    },

    /// A display collaborator failed in a way that aborts the call.
    #[error("display error: {0}")]
    Display(#[from] DisplayError),

    /// Anything not covered above.
    #[error("{0}")]
    Unknown(String),
}

impl CodecError {
    pub fn invalid_state(op: &'static str, state: impl std::fmt::Display) -> Self {
        Self::InvalidState {
            op,
            state: state.to_string(),
        }
    }

    pub fn invalid_value(msg: impl Into<String>) -> Self {
        Self::InvalidValue(msg.into())
    }

    pub fn no_memory(msg: impl Into<String>) -> Self {
        Self::NoMemory(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Classify this error for the client callback.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CodecError::InvalidState { .. } => ErrorKind::InvalidState,
            CodecError::InvalidValue(_) => ErrorKind::InvalidValue,
            CodecError::NoMemory(_) => ErrorKind::NoMemory,
            CodecError::Unsupported(_) => ErrorKind::Unsupported,
            CodecError::InternalEngine { .. } => ErrorKind::InternalEngineError,
            CodecError::Display(_) | CodecError::Unknown(_) => ErrorKind::Unknown,
        }
    }

    /// Engine-specific code carried by the error, `0` when there is none.
    pub fn code(&self) -> i32 {
        match self {
            CodecError::InternalEngine { code, .. } => *code,
            _ => 0,
        }
    }
}

/// Failures reported by a [`DisplayQueue`](crate::display::DisplayQueue).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DisplayError {
    /// The display has no free buffer to hand out.
    #[error("no free display buffer")]
    NoBuffer,

    /// The display was torn down or disconnected.
    #[error("display {0} disconnected")]
    Disconnected(u64),

    /// A buffer id is not known to the display.
    #[error("unknown display buffer {0}")]
    UnknownBuffer(u64),

    /// Any other collaborator failure.
    #[error("{0}")]
    Other(String),
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, CodecError>;
