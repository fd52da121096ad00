//! Client notification interface.

use media_codec_types::ErrorKind;

use crate::format::Format;
use crate::pool::{BufferAttr, BufferFlags, CodecBuffer};

/// Receives buffer hand-offs and errors from a session.
///
/// Methods are called from the session's worker threads (and, for the initial
/// input hand-out, from the thread calling `start`). No session lock is held
/// during a call, so implementations may call back into the session, e.g.
/// `queue_input_buffer` from `on_input_buffer_available`.
///
/// The session holds only a weak reference; dropping the last strong
/// reference silently disables notifications.
pub trait ClientCallback: Send + Sync {
    /// Input slot `index` is client-owned and may be filled.
    fn on_input_buffer_available(&self, index: usize, buffer: CodecBuffer);

    /// Output slot `index` holds a decoded frame (or the EOS marker).
    fn on_output_buffer_available(
        &self,
        index: usize,
        attr: BufferAttr,
        flags: BufferFlags,
        buffer: CodecBuffer,
    );

    /// Negotiated output format changed. Always precedes the first buffer
    /// produced at the new format.
    fn on_output_format_changed(&self, format: &Format);

    fn on_error(&self, kind: ErrorKind, code: i32);
}
