//! Codec session: lifecycle, client entry points and shared worker state.
//!
//! A [`CodecSession`] owns its engine, both buffer pools, the three
//! availability queues and the worker threads. Lifecycle calls
//! (`configure`, `start`, `flush`, ...) are serialized by an op lock; the
//! per-buffer calls (`queue_input_buffer`, `release_output_buffer`,
//! `render_output_buffer`) are not, so a client may issue them from inside
//! its callbacks.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use crossbeam_channel::Receiver;
use media_codec_types::{CodecKind, ErrorKind, SessionStatus};

use crate::callback::ClientCallback;
use crate::config::{CodecConfig, MAX_WAIT_MS, SessionOptions};
use crate::display::{DisplayEvent, DisplayInterop, DisplayQueue};
use crate::engine::CodecEngine;
use crate::error::{CodecError, Result};
use crate::format::{Format, OutputFormat, keys};
use crate::pool::{BufferAttr, BufferPool, CodecBuffer, Owner, Port, lock_slot};
use crate::queue::AvailabilityQueue;
use crate::registry::{EngineRegistry, InstanceLease, InstanceRegistry};
use crate::state::{CodecState, Op, StateMachine};
use crate::status::{SessionStats, StatusContext};
use crate::worker::input::PendingMerge;
use crate::worker::{Signal, WorkerGate, WorkerHandles};

/// Upper bound on how long flush/stop wait for workers to leave their unit.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(2 * MAX_WAIT_MS);

/// State shared between the session handle and its worker threads.
pub(crate) struct SessionCore {
    pub(crate) name: String,
    pub(crate) kind: CodecKind,
    pub(crate) options: SessionOptions,
    pub(crate) state: StateMachine,
    config: Mutex<Option<CodecConfig>>,
    /// Negotiated output geometry; its own lock, never held across callbacks.
    output_format: Mutex<Option<OutputFormat>>,
    /// Engine-access lock. The only lock both workers take.
    engine: Mutex<Option<Box<dyn CodecEngine>>>,
    callback: Mutex<Option<Weak<dyn ClientCallback>>>,
    pub(crate) input_pool: BufferPool,
    pub(crate) output_pool: BufferPool,
    pub(crate) input_q: AvailabilityQueue,
    pub(crate) engine_q: AvailabilityQueue,
    pub(crate) display_q: AvailabilityQueue,
    pub(crate) display: DisplayInterop,
    pub(crate) gate: WorkerGate,
    /// Bumped by the input worker after each accepted packet.
    pub(crate) input_progress: Signal,
    /// Bumped by the output worker after each receive.
    pub(crate) output_progress: Signal,
    pub(crate) stats: SessionStats,
    merge: Mutex<PendingMerge>,
    pub(crate) first_frame_pending: AtomicBool,
    /// Set when the negotiated format changes; cleared once the client has
    /// been told, which may be several receives later.
    pub(crate) format_change_pending: AtomicBool,
    pub(crate) output_eos: AtomicBool,
    stalls: AtomicU32,
    /// Stream generation; bumped on flush, stop and release.
    epoch: AtomicU64,
}

impl SessionCore {
    fn new(
        name: String,
        kind: CodecKind,
        engine: Option<Box<dyn CodecEngine>>,
        options: SessionOptions,
        display: DisplayInterop,
    ) -> Self {
        Self {
            name,
            kind,
            options,
            state: StateMachine::new(),
            config: Mutex::new(None),
            output_format: Mutex::new(None),
            engine: Mutex::new(engine),
            callback: Mutex::new(None),
            input_pool: BufferPool::new(Port::Input),
            output_pool: BufferPool::new(Port::Output),
            input_q: AvailabilityQueue::new("input", 0),
            engine_q: AvailabilityQueue::new("engine", 0),
            display_q: AvailabilityQueue::new("display", 0),
            display,
            gate: WorkerGate::new(),
            input_progress: Signal::default(),
            output_progress: Signal::default(),
            stats: SessionStats::default(),
            merge: Mutex::new(PendingMerge::default()),
            first_frame_pending: AtomicBool::new(false),
            format_change_pending: AtomicBool::new(false),
            output_eos: AtomicBool::new(false),
            stalls: AtomicU32::new(0),
            epoch: AtomicU64::new(0),
        }
    }

    pub(crate) fn lock_engine(&self) -> MutexGuard<'_, Option<Box<dyn CodecEngine>>> {
        self.engine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn lock_merge(&self) -> MutexGuard<'_, PendingMerge> {
        self.merge.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn lock_output_format(&self) -> MutexGuard<'_, Option<OutputFormat>> {
        self.output_format
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_config(&self) -> MutexGuard<'_, Option<CodecConfig>> {
        self.config.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn config_snapshot(&self) -> Option<CodecConfig> {
        self.lock_config().clone()
    }

    pub(crate) fn negotiated(&self) -> Option<OutputFormat> {
        *self.lock_output_format()
    }

    pub(crate) fn callback(&self) -> Option<Arc<dyn ClientCallback>> {
        self.callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Weak::upgrade)
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    fn bump_epoch(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn bump_stalls(&self) -> u32 {
        self.stalls.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn reset_stalls(&self) {
        self.stalls.store(0, Ordering::Relaxed);
    }

    fn activate(&self) {
        self.input_q.set_active(true, true);
        self.engine_q.set_active(true, true);
        self.display_q.set_active(true, true);
        self.gate.set_active(true);
    }

    /// Deactivate everything and wake every parked worker.
    fn deactivate(&self) {
        self.gate.set_active(false);
        self.input_q.set_active(false, true);
        self.engine_q.set_active(false, true);
        self.display_q.set_active(false, true);
        self.input_progress.notify();
        self.output_progress.notify();
    }

    /// Report a worker-side failure once through `on_error`.
    ///
    /// Unrecoverable kinds move the session to `Error` and stop the workers'
    /// flow; only release/reset are accepted afterwards.
    pub(crate) fn report_error(&self, kind: ErrorKind, code: i32, reason: &str) {
        SessionStats::bump(&self.stats.errors);
        tracing::error!(session = %self.name, ?kind, code, reason, "codec error");
        if kind.is_unrecoverable() && self.state.enter_error() {
            self.deactivate();
        }
        if let Some(callback) = self.callback() {
            callback.on_error(kind, code);
        }
    }

    /// [`report_error`](Self::report_error) for a [`CodecError`], keeping its code.
    pub(crate) fn report_failure(&self, error: &CodecError) {
        self.report_error(error.kind(), error.code(), &error.to_string());
    }

    /// Drop per-stream state: slots back to `Free`, queues emptied, pending
    /// merge and in-flight display map cleared.
    fn reset_stream(&self) {
        let mut binding = self.display.lock();
        let display = binding.display().cloned();
        self.input_pool.release_all(None);
        self.output_pool.release_all(display.as_deref());
        self.input_q.clear();
        self.engine_q.clear();
        self.display_q.clear();
        binding.clear_in_flight();
        drop(binding);
        self.lock_merge().reset();
        self.first_frame_pending.store(true, Ordering::Release);
        self.output_eos.store(false, Ordering::Release);
        self.reset_stalls();
    }

    fn flush_engine(&self) -> Result<()> {
        match self.lock_engine().as_mut() {
            Some(engine) => engine.flush(),
            None => Ok(()),
        }
    }
}

/// A codec instance driven by a client through [`ClientCallback`].
pub struct CodecSession {
    core: Arc<SessionCore>,
    workers: Mutex<Option<WorkerHandles>>,
    op_lock: Mutex<()>,
    events: Receiver<DisplayEvent>,
    _lease: Option<InstanceLease>,
}

impl CodecSession {
    /// Session around an already created engine.
    pub fn new(
        name: impl Into<String>,
        kind: CodecKind,
        engine: Box<dyn CodecEngine>,
        options: SessionOptions,
    ) -> Self {
        Self::build(name.into(), kind, Some(engine), options, None)
    }

    /// Session with no engine yet; see [`attach_engine`](Self::attach_engine).
    pub fn without_engine(name: impl Into<String>, kind: CodecKind, options: SessionOptions) -> Self {
        Self::build(name.into(), kind, None, options, None)
    }

    /// Resolve an engine for `mime` and reserve an instance slot for it.
    pub fn create(
        engines: &EngineRegistry,
        instances: &InstanceRegistry,
        mime: &str,
        options: SessionOptions,
    ) -> Result<Self> {
        let factory = engines.resolve(mime)?;
        let capability = factory.capability();
        let lease = instances.acquire(capability.kind)?;
        let engine = factory.create()?;
        tracing::info!(
            engine = %capability.name,
            mime,
            hardware = capability.hardware,
            "codec session created"
        );
        Ok(Self::build(
            capability.name.clone(),
            capability.kind,
            Some(engine),
            options,
            Some(lease),
        ))
    }

    fn build(
        name: String,
        kind: CodecKind,
        engine: Option<Box<dyn CodecEngine>>,
        options: SessionOptions,
        lease: Option<InstanceLease>,
    ) -> Self {
        let options = options.normalized();
        let (tx, rx) = crossbeam_channel::bounded(options.display_event_capacity);
        let core = SessionCore::new(name, kind, engine, options, DisplayInterop::new(tx));
        Self {
            core: Arc::new(core),
            workers: Mutex::new(None),
            op_lock: Mutex::new(()),
            events: rx,
            _lease: lease,
        }
    }

    fn op(&self) -> MutexGuard<'_, ()> {
        self.op_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn kind(&self) -> CodecKind {
        self.core.kind
    }

    pub fn state(&self) -> CodecState {
        self.core.state.current()
    }

    /// Install an engine while no stream is configured.
    pub fn attach_engine(&self, engine: Box<dyn CodecEngine>) -> Result<()> {
        let _op = self.op();
        let state = self.core.state.current();
        if !matches!(state, CodecState::Uninitialized | CodecState::Initialized) {
            return Err(CodecError::invalid_state("attach_engine", state));
        }
        *self.core.lock_engine() = Some(engine);
        Ok(())
    }

    /// Register the client. Only a weak reference is kept.
    pub fn set_callback(&self, callback: &Arc<dyn ClientCallback>) {
        *self
            .core
            .callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::downgrade(callback));
    }

    pub fn initialize(&self) -> Result<()> {
        let _op = self.op();
        self.core.state.check(Op::Initialize)?;
        self.core.state.set(CodecState::Initialized);
        Ok(())
    }

    /// Validate `format` and open the engine with the result.
    ///
    /// Invalid geometry or enum values leave the session untouched.
    pub fn configure(&self, format: &Format) -> Result<()> {
        let _op = self.op();
        self.core.state.check(Op::Configure)?;
        let config = CodecConfig::from_format(self.core.kind, format)?;
        match self.core.lock_engine().as_mut() {
            Some(engine) => engine.open(&config)?,
            None => {
                tracing::debug!(session = %self.core.name, "configured without engine");
            }
        }
        self.core.input_q.set_capacity(config.input_buffer_count);
        self.core.engine_q.set_capacity(config.output_buffer_count);
        self.core.display_q.set_capacity(config.output_buffer_count);
        *self.core.lock_output_format() = Some(config.output_format());
        tracing::info!(
            session = %self.core.name,
            width = config.width,
            height = config.height,
            inputs = config.input_buffer_count,
            outputs = config.output_buffer_count,
            "codec configured"
        );
        *self.core.lock_config() = Some(config);
        self.core.state.set(CodecState::Configured);
        Ok(())
    }

    /// Allocate buffers if needed, start or resume the workers and hand the
    /// initial slots out.
    pub fn start(&self) -> Result<()> {
        let op = self.op();
        self.core.state.check(Op::Start)?;

        let has_engine = self.core.lock_engine().is_some();
        let Some(callback) = self.core.callback().filter(|_| has_engine) else {
            self.shutdown_workers();
            let missing = if has_engine { "no client callback" } else { "no engine attached" };
            return Err(CodecError::invalid_state(Op::Start.name(), missing));
        };
        let config = self
            .core
            .config_snapshot()
            .ok_or_else(|| CodecError::invalid_state(Op::Start.name(), "unconfigured"))?;

        self.allocate(&config)?;
        self.ensure_workers()?;

        let core = &self.core;
        let inputs = core.input_pool.hand_out_free(Owner::Client);
        for index in core.output_pool.hand_out_free(Owner::Engine) {
            core.engine_q.push(index);
        }
        core.first_frame_pending.store(true, Ordering::Release);
        core.output_eos.store(false, Ordering::Release);
        core.reset_stalls();
        core.activate();
        core.state.set(CodecState::Running);
        drop(op);

        for index in inputs {
            if let Some(slot) = core.input_pool.slot(index) {
                callback.on_input_buffer_available(index, CodecBuffer::new(slot));
            }
        }
        Ok(())
    }

    /// Allocate whichever pools are missing. Nothing is kept on failure.
    fn allocate(&self, config: &CodecConfig) -> Result<()> {
        let core = &self.core;
        let min = core.options.min_buffers;
        let fresh_input = !core.input_pool.is_allocated();
        if fresh_input {
            core.input_pool
                .allocate_plain(config.input_buffer_count, config.max_input_size, None, min)?;
        }
        if !core.output_pool.is_allocated() {
            let format = core.negotiated().unwrap_or_else(|| config.output_format());
            let count = config.output_buffer_count;
            let allocated = match core.display.current() {
                Some(display) => {
                    core.display
                        .apply_settings(count, config.rotation, config.scale_type);
                    core.output_pool
                        .allocate_display(count, format, display.as_ref(), min)
                }
                None => {
                    let geometry = (core.kind == CodecKind::Video).then_some(format);
                    core.output_pool.allocate_plain(
                        count,
                        config.output_buffer_size(&format),
                        geometry,
                        min,
                    )
                }
            };
            if let Err(e) = allocated {
                if fresh_input {
                    core.input_pool.clear();
                }
                return Err(e);
            }
        }
        core.input_q.set_capacity(core.input_pool.len());
        core.engine_q.set_capacity(core.output_pool.len());
        core.display_q.set_capacity(core.output_pool.len());
        Ok(())
    }

    /// Drop all in-flight data and return every slot to `Free`.
    pub fn flush(&self) -> Result<()> {
        let _op = self.op();
        self.core.state.check(Op::Flush)?;
        self.core.state.set(CodecState::Flushing);
        self.core.bump_epoch();
        self.core.deactivate();
        self.core.gate.wait_idle(DRAIN_TIMEOUT);
        let flushed = self.core.flush_engine();
        self.core.reset_stream();
        self.core.state.set(CodecState::Flushed);
        if let Err(e) = &flushed {
            tracing::warn!(session = %self.core.name, error = %e, "engine flush failed");
        }
        flushed
    }

    /// Stop the workers and return to `Configured`, keeping the allocation.
    pub fn stop(&self) -> Result<()> {
        let _op = self.op();
        self.core.state.check(Op::Stop)?;
        self.core.state.set(CodecState::Stopping);
        self.core.bump_epoch();
        self.shutdown_workers();
        if let Err(e) = self.core.flush_engine() {
            tracing::warn!(session = %self.core.name, error = %e, "engine flush on stop failed");
        }
        self.core.reset_stream();
        self.core.state.set(CodecState::Configured);
        Ok(())
    }

    /// Tear everything down and return to `Uninitialized`.
    pub fn release(&self) -> Result<()> {
        let _op = self.op();
        self.core.state.check(Op::Release)?;
        let prev = self.core.state.set(CodecState::Stopping);
        self.core.bump_epoch();
        self.shutdown_workers();
        self.core.reset_stream();
        if self.core.lock_config().take().is_some() {
            if let Some(engine) = self.core.lock_engine().as_mut() {
                engine.close();
            }
        }
        self.core.display.detach();
        self.core.input_pool.clear();
        self.core.output_pool.clear();
        *self.core.lock_output_format() = None;
        self.core.format_change_pending.store(false, Ordering::Release);
        self.core.stats.reset();
        self.core.state.set(CodecState::Uninitialized);
        tracing::info!(session = %self.core.name, from = %prev, "codec released");
        Ok(())
    }

    /// Release followed by initialize; the way out of `Error`.
    pub fn reset(&self) -> Result<()> {
        self.release()?;
        self.initialize()
    }

    /// Suspend both workers without touching buffers or queue contents.
    pub fn pause(&self) -> Result<()> {
        let _op = self.op();
        self.core.state.pause()?;
        self.core.deactivate();
        Ok(())
    }

    pub fn resume(&self) -> Result<()> {
        let _op = self.op();
        self.core.state.resume()?;
        self.ensure_workers()?;
        self.core.activate();
        Ok(())
    }

    /// Make the workers observe inactivity and exit without joining them.
    ///
    /// The exited threads are replaced by the next `start` or `resume`.
    pub fn dispose(&self) {
        self.core.deactivate();
        if let Some(workers) = self.lock_workers().as_ref() {
            workers.dispose();
        }
    }

    /// Worker threads still running.
    pub fn active_workers(&self) -> usize {
        self.lock_workers()
            .as_ref()
            .map(WorkerHandles::running)
            .unwrap_or(0)
    }

    fn lock_workers(&self) -> MutexGuard<'_, Option<WorkerHandles>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn workers unless a live set exists; a disposed set is reaped first.
    fn ensure_workers(&self) -> Result<()> {
        let mut workers = self.lock_workers();
        if let Some(stale) = workers.take_if(|w| w.is_disposed()) {
            stale.join();
        }
        if workers.is_none() {
            *workers = Some(WorkerHandles::spawn(&self.core, self.events.clone())?);
        }
        Ok(())
    }

    fn shutdown_workers(&self) {
        self.core.deactivate();
        let workers = self.lock_workers().take();
        if let Some(workers) = workers {
            workers.join();
        }
        self.core.gate.wait_idle(DRAIN_TIMEOUT);
    }

    /// Hand a client-filled input slot to the engine.
    ///
    /// A zero-length slot carrying [`BufferFlags::EOS`](crate::pool::BufferFlags::EOS)
    /// signals end of stream.
    pub fn queue_input_buffer(&self, index: usize, attr: BufferAttr) -> Result<()> {
        self.core.state.check(Op::QueueInput)?;
        let slot = self
            .core
            .input_pool
            .slot(index)
            .ok_or_else(|| CodecError::invalid_value(format!("no input slot {index}")))?;
        {
            let mut g = lock_slot(&slot);
            if g.owner != Owner::Client {
                return Err(CodecError::invalid_value(format!(
                    "input slot {index} owned by {}",
                    g.owner
                )));
            }
            let capacity = g.memory.capacity();
            if attr.offset.saturating_add(attr.size) > capacity {
                return Err(CodecError::invalid_value(format!(
                    "input range {}+{} exceeds slot capacity {capacity}",
                    attr.offset, attr.size
                )));
            }
            g.attr = attr;
            g.owner = Owner::Engine;
        }
        SessionStats::bump(&self.core.stats.inputs_queued);
        self.core.input_q.push(index);
        tracing::debug!(index, size = attr.size, pts = attr.pts, "input queued");
        Ok(())
    }

    /// Return a delivered output slot to the engine unrendered.
    pub fn release_output_buffer(&self, index: usize) -> Result<()> {
        self.core.state.check(Op::ReleaseOutput)?;
        self.core
            .output_pool
            .transfer(index, Owner::Client, Owner::Engine)?;
        self.core.engine_q.push(index);
        tracing::debug!(index, "output released");
        Ok(())
    }

    /// Present a delivered output slot on the bound display.
    pub fn render_output_buffer(&self, index: usize) -> Result<()> {
        self.core.state.check(Op::RenderOutput)?;
        match self.core.output_pool.owner(index) {
            Some(Owner::Client) => {}
            Some(owner) => {
                return Err(CodecError::invalid_value(format!(
                    "output slot {index} owned by {owner}"
                )));
            }
            None => return Err(CodecError::invalid_value(format!("no output slot {index}"))),
        }
        let config = self
            .core
            .config_snapshot()
            .ok_or_else(|| CodecError::invalid_state(Op::RenderOutput.name(), "unconfigured"))?;
        self.core.display.render(
            &self.core.output_pool,
            &self.core.display_q,
            index,
            config.rotation,
            config.scale_type,
        )?;
        SessionStats::bump(&self.core.stats.outputs_rendered);
        Ok(())
    }

    /// Bind a display (before start) or swap to another one while streaming.
    pub fn set_output_display(&self, display: Arc<dyn DisplayQueue>) -> Result<()> {
        let _op = self.op();
        let state = self.core.state.check(Op::SetDisplay)?;
        if self.core.kind != CodecKind::Video {
            return Err(CodecError::unsupported("output display on an audio session"));
        }
        let core = &self.core;
        if !state.is_streaming() {
            if core.output_pool.is_allocated() {
                core.output_pool.release_all(core.display.current().as_deref());
                core.output_pool.clear();
            }
            return core.display.bind(display);
        }
        if !core.display.is_bound() {
            return Err(CodecError::invalid_state(
                Op::SetDisplay.name(),
                "streaming without a display",
            ));
        }
        let config = core
            .config_snapshot()
            .ok_or_else(|| CodecError::invalid_state(Op::SetDisplay.name(), "unconfigured"))?;
        core.display
            .replace(
                &core.output_pool,
                display,
                core.output_pool.len(),
                config.rotation,
                config.scale_type,
            )
            .map(|_| ())
    }

    /// Apply runtime parameters (bitrate, frame-rate, rotation, scale-type).
    pub fn set_parameter(&self, format: &Format) -> Result<()> {
        let _op = self.op();
        self.core.state.check(Op::SetParameter)?;
        let current = self
            .core
            .config_snapshot()
            .ok_or_else(|| CodecError::invalid_state(Op::SetParameter.name(), "unconfigured"))?;
        let (next, applied) = current.with_parameters(format)?;
        if applied.is_empty() {
            return Ok(());
        }
        if let Some(engine) = self.core.lock_engine().as_mut() {
            engine.set_parameter(&next)?;
        }
        if next.rotation != current.rotation || next.scale_type != current.scale_type {
            self.core
                .display
                .apply_settings(self.core.output_pool.len(), next.rotation, next.scale_type);
        }
        tracing::info!(session = %self.core.name, ?applied, "parameters updated");
        *self.core.lock_config() = Some(next);
        Ok(())
    }

    /// Current negotiated output format.
    pub fn output_format(&self) -> Result<Format> {
        let config = self
            .core
            .config_snapshot()
            .ok_or_else(|| CodecError::invalid_state("output_format", self.state()))?;
        match self.core.kind {
            CodecKind::Video => Ok(self
                .core
                .negotiated()
                .unwrap_or_else(|| config.output_format())
                .to_format()),
            CodecKind::Audio => {
                let mut format = Format::new();
                if let Some(rate) = config.sample_rate {
                    format.set_int(keys::SAMPLE_RATE, rate as i64);
                }
                if let Some(channels) = config.channel_count {
                    format.set_int(keys::CHANNEL_COUNT, channels as i64);
                }
                Ok(format)
            }
        }
    }

    /// Handle on an input slot.
    pub fn input_buffer(&self, index: usize) -> Result<CodecBuffer> {
        self.core
            .input_pool
            .slot(index)
            .map(CodecBuffer::new)
            .ok_or_else(|| CodecError::invalid_value(format!("no input slot {index}")))
    }

    /// Handle on an output slot.
    pub fn output_buffer(&self, index: usize) -> Result<CodecBuffer> {
        self.core
            .output_pool
            .slot(index)
            .map(CodecBuffer::new)
            .ok_or_else(|| CodecError::invalid_value(format!("no output slot {index}")))
    }

    /// Ownership tags of the input pool, by index.
    pub fn input_owners(&self) -> Vec<Owner> {
        self.core.input_pool.owners()
    }

    /// Ownership tags of the output pool, by index.
    pub fn output_owners(&self) -> Vec<Owner> {
        self.core.output_pool.owners()
    }

    /// Counters and geometry as a serializable snapshot.
    pub fn status(&self) -> SessionStatus {
        self.core.stats.snapshot(StatusContext {
            engine: &self.core.name,
            kind: self.core.kind,
            state: self.core.state.current(),
            output_format: self.core.negotiated(),
            display_mode: self.core.display.is_bound(),
            input_buffers: self.core.input_pool.len(),
            output_buffers: self.core.output_pool.len(),
        })
    }
}

impl Drop for CodecSession {
    fn drop(&mut self) {
        if self.core.state.current() != CodecState::Uninitialized {
            if let Err(e) = self.release() {
                tracing::warn!(session = %self.core.name, error = %e, "release on drop failed");
            }
        } else {
            self.shutdown_workers();
        }
    }
}
