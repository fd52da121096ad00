//! Input worker: moves client-filled slots into the engine.

use std::time::Duration;

use media_codec_types::ErrorKind;

use crate::config::MAX_WAIT_MS;
use crate::engine::{EngineStatus, SendDescriptor};
use crate::pool::{BufferAttr, CodecBuffer, Owner, lock_slot};
use crate::session::SessionCore;
use crate::status::SessionStats;

/// Bytes of a partial frame waiting for the rest of its packet.
#[derive(Debug, Default)]
pub(crate) struct PendingMerge {
    data: Vec<u8>,
    /// Input slots whose bytes are in `data`; recycled once the merge is sent.
    held: Vec<usize>,
    pts: Option<i64>,
}

impl PendingMerge {
    pub(crate) fn reset(&mut self) {
        self.data.clear();
        self.held.clear();
        self.pts = None;
    }
}

/// One bounded iteration of the input loop.
pub(crate) fn step(core: &SessionCore) {
    let Some(_unit) = core.gate.enter() else {
        core.gate.wait_active(core.options.idle_wait());
        return;
    };
    let Some(index) = core
        .input_q
        .pop_timeout(Duration::from_millis(MAX_WAIT_MS))
    else {
        return;
    };
    if !core.gate.is_active() {
        core.input_q.requeue_front(index);
        return;
    }

    let Some(slot) = core.input_pool.slot(index) else {
        tracing::warn!(index, "queued input index has no slot");
        return;
    };
    let (attr, payload) = {
        let g = lock_slot(&slot);
        if g.owner != Owner::Engine {
            tracing::warn!(index, owner = %g.owner, "queued input slot not engine-owned");
            return;
        }
        let attr = g.attr;
        let payload = g.memory.with_bytes(|bytes| {
            let end = (attr.offset + attr.size).min(bytes.len());
            bytes[attr.offset.min(end)..end].to_vec()
        });
        (attr, payload)
    };

    let mut merge = core.lock_merge();
    let merged = !merge.held.is_empty();
    let packet = if merged {
        let mut joined = merge.data.clone();
        joined.extend_from_slice(&payload);
        joined
    } else {
        payload
    };
    let desc = SendDescriptor {
        index,
        data: &packet,
        pts: merge.pts.unwrap_or(attr.pts),
        flags: attr.flags,
    };

    loop {
        let seen = core.output_progress.generation();
        let status = {
            let mut engine = core.lock_engine();
            let Some(engine) = engine.as_mut() else {
                drop(merge);
                core.input_q.requeue_front(index);
                return;
            };
            engine.send(&desc)
        };

        match status {
            EngineStatus::Ok | EngineStatus::EndOfStream => {
                SessionStats::bump(&core.stats.inputs_sent);
                tracing::debug!(index, size = desc.data.len(), merged, eos = desc.is_eos(), "input sent");
                let mut done: Vec<usize> = merge.held.drain(..).collect();
                done.push(index);
                merge.reset();
                drop(merge);
                core.input_progress.notify();
                recycle(core, &done);
                return;
            }
            EngineStatus::NotEnoughData => {
                if desc.data.len() > max_input_size(core) {
                    drop(merge);
                    core.report_error(
                        ErrorKind::NoMemory,
                        0,
                        &format!("merged input of {} bytes exceeds max-input-size", desc.data.len()),
                    );
                    return;
                }
                merge.data = packet.clone();
                merge.pts.get_or_insert(attr.pts);
                merge.held.push(index);
                tracing::debug!(index, pending = merge.data.len(), "partial input held for merge");
                return;
            }
            EngineStatus::TryAgain => {
                SessionStats::bump(&core.stats.try_again_waits);
                core.output_progress
                    .wait_for_change(seen, core.options.try_again_wait());
                if !core.gate.is_active() {
                    drop(merge);
                    core.input_q.requeue_front(index);
                    return;
                }
            }
            EngineStatus::Error(fault) => {
                drop(merge);
                core.report_error(fault.kind, fault.code, &fault.reason);
                return;
            }
        }
    }
}

fn max_input_size(core: &SessionCore) -> usize {
    core.config_snapshot()
        .map(|c| c.max_input_size)
        .unwrap_or(usize::MAX)
}

/// Hand consumed input slots back to the client, then notify.
fn recycle(core: &SessionCore, indices: &[usize]) {
    let mut ready = Vec::with_capacity(indices.len());
    for &index in indices {
        let Some(slot) = core.input_pool.slot(index) else {
            continue;
        };
        {
            let mut g = lock_slot(&slot);
            if g.owner != Owner::Engine {
                continue;
            }
            g.owner = Owner::Client;
            g.attr = BufferAttr::default();
        }
        ready.push((index, CodecBuffer::new(slot)));
    }
    if let Some(callback) = core.callback() {
        for (index, buffer) in ready {
            callback.on_input_buffer_available(index, buffer);
        }
    }
}
