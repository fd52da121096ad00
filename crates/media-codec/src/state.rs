//! Codec lifecycle gate.
//!
//! Every public session call names an [`Op`]; the state machine checks the
//! current state against that op's allowed set before anything is mutated.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use media_codec_types::CodecStateLabel;

use crate::error::{CodecError, Result};

/// Lifecycle state of a codec session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CodecState {
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

impl CodecState {
    pub fn label(self) -> CodecStateLabel {
        match self {
            CodecState::Uninitialized => CodecStateLabel::Uninitialized,
            CodecState::Initialized => CodecStateLabel::Initialized,
            CodecState::Configured => CodecStateLabel::Configured,
            CodecState::Running => CodecStateLabel::Running,
            CodecState::Flushing => CodecStateLabel::Flushing,
            CodecState::Flushed => CodecStateLabel::Flushed,
            CodecState::Stopping => CodecStateLabel::Stopping,
            CodecState::Eos => CodecStateLabel::Eos,
            CodecState::Paused => CodecStateLabel::Paused,
            CodecState::Error => CodecStateLabel::Error,
        }
    }

    /// States in which buffers are allocated and workers exist.
    pub fn is_streaming(self) -> bool {
        matches!(
            self,
            CodecState::Running | CodecState::Flushed | CodecState::Eos | CodecState::Paused
        )
    }
}

impl fmt::Display for CodecState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CodecState::Uninitialized => "uninitialized",
            CodecState::Initialized => "initialized",
            CodecState::Configured => "configured",
            CodecState::Running => "running",
            CodecState::Flushing => "flushing",
            CodecState::Flushed => "flushed",
            CodecState::Stopping => "stopping",
            CodecState::Eos => "eos",
            CodecState::Paused => "paused",
            CodecState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Operations gated by the state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    Initialize,
    Configure,
    Start,
    Flush,
    Stop,
    Release,
    Pause,
    Resume,
    QueueInput,
    ReleaseOutput,
    RenderOutput,
    SetParameter,
    SetDisplay,
}

impl Op {
    pub fn name(self) -> &'static str {
        match self {
            Op::Initialize => "initialize",
            Op::Configure => "configure",
            Op::Start => "start",
            Op::Flush => "flush",
            Op::Stop => "stop",
            Op::Release => "release",
            Op::Pause => "pause",
            Op::Resume => "resume",
            Op::QueueInput => "queue_input_buffer",
            Op::ReleaseOutput => "release_output_buffer",
            Op::RenderOutput => "render_output_buffer",
            Op::SetParameter => "set_parameter",
            Op::SetDisplay => "set_output_display",
        }
    }

    /// States from which this op may be invoked.
    pub fn allowed_from(self) -> &'static [CodecState] {
        use CodecState::*;
        match self {
            Op::Initialize => &[Uninitialized, Initialized],
            Op::Configure => &[Initialized],
            Op::Start => &[Configured, Flushed],
            Op::Flush => &[Running, Eos, Paused],
            Op::Stop => &[Running, Flushed, Eos, Paused],
            Op::Release => &[
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
            ],
            Op::Pause => &[Running, Eos],
            Op::Resume => &[Paused],
            Op::QueueInput => &[Running],
            Op::ReleaseOutput => &[Running, Eos, Paused],
            Op::RenderOutput => &[Running, Eos, Paused],
            Op::SetParameter => &[Configured, Running, Flushed, Eos, Paused],
            Op::SetDisplay => &[Initialized, Configured, Running, Flushed, Eos, Paused],
        }
    }
}

/// Mutex-guarded lifecycle state.
#[derive(Debug)]
pub(crate) struct StateMachine {
    inner: Mutex<StateInner>,
}

#[derive(Debug)]
struct StateInner {
    state: CodecState,
    /// State to return to on resume.
    paused_from: Option<CodecState>,
}

impl StateMachine {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(StateInner {
                state: CodecState::Uninitialized,
                paused_from: None,
            }),
        }
    }

    pub(crate) fn current(&self) -> CodecState {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .state
    }

    /// Check that `op` is allowed right now. Nothing is mutated.
    pub(crate) fn check(&self, op: Op) -> Result<CodecState> {
        let state = self.current();
        if op.allowed_from().contains(&state) {
            Ok(state)
        } else {
            Err(CodecError::invalid_state(op.name(), state))
        }
    }

    pub(crate) fn set(&self, next: CodecState) -> CodecState {
        let mut g = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let prev = g.state;
        g.state = next;
        if next != CodecState::Paused {
            g.paused_from = None;
        }
        drop(g);
        if prev != next {
            tracing::info!(from = %prev, to = %next, "codec state changed");
        }
        prev
    }

    /// Enter `Paused`, remembering where to resume.
    pub(crate) fn pause(&self) -> Result<()> {
        let mut g = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if !Op::Pause.allowed_from().contains(&g.state) {
            return Err(CodecError::invalid_state(Op::Pause.name(), g.state));
        }
        let prev = g.state;
        g.paused_from = Some(prev);
        g.state = CodecState::Paused;
        drop(g);
        tracing::info!(from = %prev, "codec paused");
        Ok(())
    }

    /// Leave `Paused` for the state recorded by [`pause`](Self::pause).
    pub(crate) fn resume(&self) -> Result<CodecState> {
        let mut g = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if g.state != CodecState::Paused {
            return Err(CodecError::invalid_state(Op::Resume.name(), g.state));
        }
        let next = g.paused_from.take().unwrap_or(CodecState::Running);
        g.state = next;
        drop(g);
        tracing::info!(to = %next, "codec resumed");
        Ok(next)
    }

    /// Worker-driven `Running -> Eos`. Returns `false` if the state moved on.
    pub(crate) fn enter_eos(&self) -> bool {
        let mut g = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        match g.state {
            CodecState::Running => {
                g.state = CodecState::Eos;
                drop(g);
                tracing::info!("codec reached end of stream");
                true
            }
            CodecState::Paused if g.paused_from == Some(CodecState::Running) => {
                g.paused_from = Some(CodecState::Eos);
                true
            }
            _ => false,
        }
    }

    /// Worker-driven move into `Error`. Ignored once teardown has begun.
    pub(crate) fn enter_error(&self) -> bool {
        let mut g = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        match g.state {
            CodecState::Uninitialized | CodecState::Stopping | CodecState::Error => false,
            prev => {
                g.state = CodecState::Error;
                g.paused_from = None;
                drop(g);
                tracing::error!(from = %prev, "codec entered error state");
                true
            }
        }
    }
}
