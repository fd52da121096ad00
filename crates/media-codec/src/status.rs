use std::sync::atomic::{AtomicU64, Ordering};

use media_codec_types::{CodecKind, SessionStatus};

use crate::format::OutputFormat;
use crate::state::CodecState;

/// Shared counters updated by the session and its workers.
#[derive(Debug, Default)]
pub struct SessionStats {
    /// Input slots accepted from the client.
    pub inputs_queued: AtomicU64,
    /// Packets accepted by the engine.
    pub inputs_sent: AtomicU64,
    /// Output slots handed to the client.
    pub outputs_delivered: AtomicU64,
    /// Output slots flushed to a display.
    pub outputs_rendered: AtomicU64,
    /// Display releases matched back to a slot.
    pub display_releases: AtomicU64,
    pub format_changes: AtomicU64,
    /// Engine "try again" parks on either worker.
    pub try_again_waits: AtomicU64,
    /// Output receives that came back with nothing decoded.
    pub output_stalls: AtomicU64,
    /// Errors reported through `on_error`.
    pub errors: AtomicU64,
}

/// Identity and geometry fed into a snapshot.
pub(crate) struct StatusContext<'a> {
    pub engine: &'a str,
    pub kind: CodecKind,
    pub state: CodecState,
    pub output_format: Option<OutputFormat>,
    pub display_mode: bool,
    pub input_buffers: usize,
    pub output_buffers: usize,
}

impl SessionStats {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Zero every counter (on release).
    pub fn reset(&self) {
        for counter in [
            &self.inputs_queued,
            &self.inputs_sent,
            &self.outputs_delivered,
            &self.outputs_rendered,
            &self.display_releases,
            &self.format_changes,
            &self.try_again_waits,
            &self.output_stalls,
            &self.errors,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    /// Return a snapshot suitable for API responses.
    pub(crate) fn snapshot(&self, ctx: StatusContext<'_>) -> SessionStatus {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        let video = ctx.kind == CodecKind::Video;
        SessionStatus {
            engine: ctx.engine.to_string(),
            kind: ctx.kind,
            state: ctx.state.label(),
            width: ctx.output_format.filter(|_| video).map(|f| f.width),
            height: ctx.output_format.filter(|_| video).map(|f| f.height),
            display_mode: ctx.display_mode,
            input_buffers: ctx.input_buffers,
            output_buffers: ctx.output_buffers,
            inputs_queued: load(&self.inputs_queued),
            inputs_sent: load(&self.inputs_sent),
            outputs_delivered: load(&self.outputs_delivered),
            outputs_rendered: load(&self.outputs_rendered),
            display_releases: load(&self.display_releases),
            format_changes: load(&self.format_changes),
            try_again_waits: load(&self.try_again_waits),
            output_stalls: load(&self.output_stalls),
            errors: load(&self.errors),
        }
    }
}
