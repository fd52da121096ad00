//! Output worker: fills engine-owned output slots and hands them to the client.

use std::sync::atomic::Ordering;
use std::time::Duration;

use media_codec_types::CodecKind;

use crate::config::MAX_WAIT_MS;
use crate::display;
use crate::engine::{EngineStatus, FrameInfo};
use crate::error::{CodecError, Result};
use crate::format::OutputFormat;
use crate::pool::{BufferAttr, BufferFlags, CodecBuffer, Owner, SlotMemory, alloc_plain, lock_slot};
use crate::session::SessionCore;
use crate::status::SessionStats;

/// One bounded iteration of the output loop.
pub(crate) fn step(core: &SessionCore) {
    if core.output_eos.load(Ordering::Acquire) {
        let seen = core.input_progress.generation();
        core.input_progress
            .wait_for_change(seen, core.options.idle_wait());
        return;
    }
    let Some(_unit) = core.gate.enter() else {
        core.gate.wait_active(core.options.idle_wait());
        return;
    };
    let Some(index) = core
        .engine_q
        .pop_timeout(Duration::from_millis(MAX_WAIT_MS))
    else {
        return;
    };
    if !core.gate.is_active() || core.output_eos.load(Ordering::Acquire) {
        core.engine_q.requeue_front(index);
        return;
    }
    let epoch = core.epoch();

    if let Err(e) = ensure_output_memory(core, index) {
        core.engine_q.requeue_front(index);
        core.report_failure(&e);
        return;
    }

    let seen_input = core.input_progress.generation();
    let mut info = FrameInfo::default();
    let mut engine = core.lock_engine();
    let Some(eng) = engine.as_mut() else {
        drop(engine);
        core.engine_q.requeue_front(index);
        return;
    };

    match eng.receive(&mut info) {
        EngineStatus::Ok => {
            core.reset_stalls();
            if let Some(format) = detect_format_change(core, &info) {
                core.format_change_pending.store(true, Ordering::Release);
                if let Err(e) = realloc_for_format(core, index, format) {
                    drop(engine);
                    core.engine_q.requeue_front(index);
                    core.report_failure(&e);
                    return;
                }
            }
            let Some(slot) = core.output_pool.slot(index) else {
                return;
            };
            let copied = {
                let mut g = lock_slot(&slot);
                let copied = g.memory.with_bytes_mut(|dst| eng.copy_frame(dst));
                if let Ok(size) = copied {
                    g.attr = BufferAttr {
                        pts: info.pts,
                        size: size.min(g.memory.capacity()),
                        offset: 0,
                        flags: info.flags,
                    };
                    g.first_frame = core.first_frame_pending.swap(false, Ordering::AcqRel);
                }
                copied
            };
            drop(engine);
            core.output_progress.notify();

            if let Err(e) = copied {
                core.engine_q.requeue_front(index);
                core.report_failure(&e);
                return;
            }
            announce_format_change(core);
            deliver(core, index, epoch);
        }
        EngineStatus::EndOfStream => {
            if let Some(slot) = core.output_pool.slot(index) {
                let mut g = lock_slot(&slot);
                g.attr = BufferAttr {
                    pts: info.pts,
                    size: 0,
                    offset: 0,
                    flags: info.flags | BufferFlags::EOS,
                };
            }
            drop(engine);
            core.output_eos.store(true, Ordering::Release);
            core.output_progress.notify();
            core.state.enter_eos();
            deliver(core, index, epoch);
        }
        EngineStatus::NotEnoughData => {
            drop(engine);
            core.engine_q.push(index);
            SessionStats::bump(&core.stats.output_stalls);
            let stalls = core.bump_stalls();
            if stalls == core.options.stall_warn_threshold {
                tracing::warn!(stalls, "engine produced no output for many consecutive receives");
            }
            core.input_progress
                .wait_for_change(seen_input, core.options.try_again_wait());
        }
        EngineStatus::TryAgain => {
            drop(engine);
            core.engine_q.requeue_front(index);
            SessionStats::bump(&core.stats.try_again_waits);
            core.output_progress.notify();
            core.input_progress
                .wait_for_change(seen_input, core.options.try_again_wait());
        }
        EngineStatus::Error(fault) => {
            drop(engine);
            if !fault.kind.is_unrecoverable() {
                core.engine_q.requeue_front(index);
            }
            core.report_error(fault.kind, fault.code, &fault.reason);
        }
    }
}

/// Move a filled slot to the client and notify, unless a flush intervened.
fn deliver(core: &SessionCore, index: usize, epoch: u64) {
    if core.epoch() != epoch {
        return;
    }
    let Some(slot) = core.output_pool.slot(index) else {
        return;
    };
    let attr = {
        let mut g = lock_slot(&slot);
        if g.owner != Owner::Engine {
            return;
        }
        g.owner = Owner::Client;
        g.attr
    };
    SessionStats::bump(&core.stats.outputs_delivered);
    tracing::debug!(index, pts = attr.pts, size = attr.size, eos = attr.flags.contains(BufferFlags::EOS), "output delivered");
    if let Some(callback) = core.callback() {
        callback.on_output_buffer_available(index, attr, attr.flags, CodecBuffer::new(slot));
    }
}

/// Tell the client about a pending format change before the first buffer
/// that carries it.
fn announce_format_change(core: &SessionCore) {
    if !core.format_change_pending.swap(false, Ordering::AcqRel) {
        return;
    }
    let Some(format) = core.negotiated() else {
        return;
    };
    SessionStats::bump(&core.stats.format_changes);
    tracing::info!(
        width = format.width,
        height = format.height,
        pixel_format = ?format.pixel_format,
        bit_depth = format.bit_depth,
        "output format changed"
    );
    if let Some(callback) = core.callback() {
        callback.on_output_format_changed(&format.to_format());
    }
}

/// Compare the frame's geometry with the negotiated one and adopt it if it
/// differs. Only the first worker to see a given change gets `Some`.
fn detect_format_change(core: &SessionCore, info: &FrameInfo) -> Option<OutputFormat> {
    let geometry = info.geometry?;
    let reported = OutputFormat::new(geometry.width, geometry.height, geometry.pixel_format);
    let mut negotiated = core.lock_output_format();
    match negotiated.as_ref() {
        Some(current) if !reported.differs_from(current) => None,
        _ => {
            *negotiated = Some(reported);
            Some(reported)
        }
    }
}

/// Make the slot's memory match the negotiated geometry before receiving.
fn ensure_output_memory(core: &SessionCore, index: usize) -> Result<()> {
    let Some(slot) = core.output_pool.slot(index) else {
        return Err(CodecError::invalid_value(format!("no output slot {index}")));
    };
    let negotiated = core.negotiated();
    let stale = {
        let g = lock_slot(&slot);
        let empty = matches!(g.memory, SlotMemory::Empty);
        let mismatched = core.kind == CodecKind::Video
            && match (g.geometry, negotiated) {
                (Some(have), Some(want)) => have.differs_from(&want),
                (None, Some(_)) => true,
                _ => false,
            };
        empty || mismatched
    };
    if !stale {
        return Ok(());
    }
    reallocate_slot(core, index, negotiated)
}

/// Replace one slot's memory for `format`.
fn reallocate_slot(core: &SessionCore, index: usize, format: Option<OutputFormat>) -> Result<()> {
    let config = core
        .config_snapshot()
        .ok_or_else(|| CodecError::invalid_state("output", "unconfigured"))?;
    let format = format.unwrap_or_else(|| config.output_format());
    match core.display.current() {
        Some(display) => display::reacquire(display.as_ref(), &core.output_pool, index, format),
        None => {
            let size = config.output_buffer_size(&format);
            let memory = alloc_plain(size).ok_or_else(|| {
                CodecError::no_memory(format!("output slot {index}: {size} bytes"))
            })?;
            let geometry = (core.kind == CodecKind::Video).then_some(format);
            core.output_pool
                .update_slot(index, SlotMemory::Plain(memory), geometry)?;
            Ok(())
        }
    }
}

/// Reallocate for a new negotiated format.
///
/// Display mode re-acquires only `index` now; other slots follow lazily when
/// they next reach the engine. Plain mode also reallocates every slot the
/// client does not hold.
fn realloc_for_format(core: &SessionCore, index: usize, format: OutputFormat) -> Result<()> {
    reallocate_slot(core, index, Some(format))?;
    if core.display.is_bound() {
        return Ok(());
    }
    for other in 0..core.output_pool.len() {
        if other == index || core.output_pool.owner(other) == Some(Owner::Client) {
            continue;
        }
        if let Err(e) = reallocate_slot(core, other, Some(format)) {
            tracing::warn!(index = other, error = %e, "eager output reallocation failed");
        }
    }
    Ok(())
}

