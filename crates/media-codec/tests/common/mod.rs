#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use media_codec::{
    BufferAttr, BufferFlags, ClientCallback, CodecBuffer, CodecConfig, CodecEngine, CodecError,
    DisplayError,
    DisplayQueue, EngineStatus, ErrorKind, FlushConfig, Format, FrameGeometry, FrameInfo,
    GraphicBuffer, OutputFormat, ReleaseListener, Result, Rotation, ScaleType, SendDescriptor,
    SessionOptions, keys,
};
use tracing_subscriber::EnvFilter;

pub const WAIT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Short waits so tests do not sit in parks.
pub fn fast_options() -> SessionOptions {
    SessionOptions {
        try_again_wait_ms: 5,
        idle_wait_ms: 5,
        ..SessionOptions::default()
    }
}

pub fn video_format(width: i64, height: i64, inputs: i64, outputs: i64) -> Format {
    Format::new()
        .with_int(keys::WIDTH, width)
        .with_int(keys::HEIGHT, height)
        .with_int(keys::MAX_INPUT_BUFFER_COUNT, inputs)
        .with_int(keys::MAX_OUTPUT_BUFFER_COUNT, outputs)
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone, Debug)]
pub struct MockFrame {
    pub data: Vec<u8>,
    pub pts: i64,
    pub geometry: Option<FrameGeometry>,
}

/// Observable state behind a [`MockEngine`].
#[derive(Debug, Default)]
pub struct MockEngineState {
    /// Every packet the engine was handed: (bytes, pts, flags).
    pub sent: Vec<(Vec<u8>, i64, BufferFlags)>,
    /// Statuses returned by successive sends; `Ok` once exhausted.
    pub send_script: VecDeque<EngineStatus>,
    /// Statuses returned by successive receives before frames are consulted.
    pub receive_script: VecDeque<EngineStatus>,
    /// Accepted non-EOS packets become frames carrying the same bytes.
    pub frames: VecDeque<MockFrame>,
    /// Geometry stamped on frames produced from here on.
    pub geometry: Option<FrameGeometry>,
    pub eos_pending: bool,
    pub current: Option<MockFrame>,
    /// Copies that fail (dropping their frame) before copies succeed again.
    pub copy_failures: usize,
    pub opened: usize,
    pub flushes: usize,
    pub closed: usize,
    pub parameters: Vec<CodecConfig>,
}

/// Scripted engine that echoes every accepted packet as one output frame.
pub struct MockEngine {
    state: Arc<Mutex<MockEngineState>>,
}

impl MockEngine {
    pub fn new() -> (Self, Arc<Mutex<MockEngineState>>) {
        let state = Arc::new(Mutex::new(MockEngineState::default()));
        (
            Self {
                state: state.clone(),
            },
            state,
        )
    }
}

pub fn engine_state(state: &Arc<Mutex<MockEngineState>>) -> MutexGuard<'_, MockEngineState> {
    lock(state)
}

impl CodecEngine for MockEngine {
    fn open(&mut self, _config: &CodecConfig) -> Result<()> {
        lock(&self.state).opened += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        let mut s = lock(&self.state);
        s.flushes += 1;
        s.frames.clear();
        s.current = None;
        s.eos_pending = false;
        Ok(())
    }

    fn close(&mut self) {
        lock(&self.state).closed += 1;
    }

    fn send(&mut self, input: &SendDescriptor<'_>) -> EngineStatus {
        let mut s = lock(&self.state);
        s.sent.push((input.data.to_vec(), input.pts, input.flags));
        let status = s.send_script.pop_front().unwrap_or(EngineStatus::Ok);
        if matches!(status, EngineStatus::Ok | EngineStatus::EndOfStream) {
            if input.is_eos() {
                s.eos_pending = true;
            } else {
                let geometry = s.geometry;
                s.frames.push_back(MockFrame {
                    data: input.data.to_vec(),
                    pts: input.pts,
                    geometry,
                });
            }
        }
        status
    }

    fn receive(&mut self, info: &mut FrameInfo) -> EngineStatus {
        let mut s = lock(&self.state);
        if let Some(status) = s.receive_script.pop_front() {
            return status;
        }
        if let Some(frame) = s.frames.pop_front() {
            info.pts = frame.pts;
            info.size = frame.data.len();
            info.geometry = frame.geometry;
            s.current = Some(frame);
            return EngineStatus::Ok;
        }
        if s.eos_pending {
            s.eos_pending = false;
            return EngineStatus::EndOfStream;
        }
        EngineStatus::TryAgain
    }

    fn copy_frame(&mut self, dst: &mut [u8]) -> Result<usize> {
        let mut s = lock(&self.state);
        if s.copy_failures > 0 {
            s.copy_failures -= 1;
            s.current = None;
            return Err(CodecError::InternalEngine {
                code: -9,
                reason: "frame copy failed".to_string(),
            });
        }
        let frame = s.current.take().unwrap_or(MockFrame {
            data: Vec::new(),
            pts: 0,
            geometry: None,
        });
        let n = frame.data.len().min(dst.len());
        dst[..n].copy_from_slice(&frame.data[..n]);
        Ok(n)
    }

    fn set_parameter(&mut self, config: &CodecConfig) -> Result<()> {
        lock(&self.state).parameters.push(config.clone());
        Ok(())
    }
}

/// What the client saw, in order.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Input(usize),
    Output {
        index: usize,
        attr: BufferAttr,
        data: Vec<u8>,
    },
    FormatChanged(Format),
    Error(ErrorKind, i32),
}

/// Callback that records every notification and lets tests wait on them.
#[derive(Default)]
pub struct RecordingCallback {
    events: Mutex<Vec<Event>>,
    cv: Condvar,
    buffers: Mutex<Vec<(usize, CodecBuffer)>>,
}

impl RecordingCallback {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn record(&self, event: Event) {
        lock(&self.events).push(event);
        self.cv.notify_all();
    }

    pub fn events(&self) -> Vec<Event> {
        lock(&self.events).clone()
    }

    pub fn clear(&self) {
        lock(&self.events).clear();
    }

    /// Wait until `pred` holds over the recorded events.
    pub fn wait_for(&self, pred: impl Fn(&[Event]) -> bool) -> bool {
        let deadline = Instant::now() + WAIT;
        let mut events = lock(&self.events);
        loop {
            if pred(&events) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (g, _) = self
                .cv
                .wait_timeout(events, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            events = g;
        }
    }

    pub fn input_indices(&self) -> Vec<usize> {
        self.events()
            .iter()
            .filter_map(|e| match e {
                Event::Input(i) => Some(*i),
                _ => None,
            })
            .collect()
    }

    pub fn outputs(&self) -> Vec<(usize, BufferAttr, Vec<u8>)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Output { index, attr, data } => Some((index, attr, data)),
                _ => None,
            })
            .collect()
    }

    /// Most recent handle received for input slot `index`.
    pub fn input_buffer(&self, index: usize) -> Option<CodecBuffer> {
        lock(&self.buffers)
            .iter()
            .rev()
            .find(|(i, _)| *i == index)
            .map(|(_, b)| b.clone())
    }
}

pub fn count_outputs(events: &[Event]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, Event::Output { .. }))
        .count()
}

pub fn count_inputs(events: &[Event]) -> usize {
    events.iter().filter(|e| matches!(e, Event::Input(_))).count()
}

impl ClientCallback for RecordingCallback {
    fn on_input_buffer_available(&self, index: usize, buffer: CodecBuffer) {
        lock(&self.buffers).push((index, buffer));
        self.record(Event::Input(index));
    }

    fn on_output_buffer_available(
        &self,
        index: usize,
        attr: BufferAttr,
        _flags: BufferFlags,
        buffer: CodecBuffer,
    ) {
        let data = buffer.read().unwrap_or_default();
        self.record(Event::Output { index, attr, data });
    }

    fn on_output_format_changed(&self, format: &Format) {
        self.record(Event::FormatChanged(format.clone()));
    }

    fn on_error(&self, kind: ErrorKind, code: i32) {
        self.record(Event::Error(kind, code));
    }
}

/// Calls recorded by a [`MockDisplay`].
#[derive(Debug, Default)]
pub struct DisplayCalls {
    pub requested: Vec<u64>,
    pub cancelled: Vec<u64>,
    pub flushed: Vec<(u64, FlushConfig)>,
    pub attached: Vec<u64>,
    pub registered: usize,
    pub unregistered: usize,
    pub cache_cleans: usize,
    pub queue_size: Option<usize>,
    pub transform: Option<Rotation>,
    pub scaling: Option<ScaleType>,
}

/// In-memory display queue.
pub struct MockDisplay {
    id: u64,
    next_buffer: AtomicU64,
    pub calls: Mutex<DisplayCalls>,
    listener: Mutex<Option<ReleaseListener>>,
    /// Fail the n-th attach (0-based) with `Disconnected`.
    pub fail_attach_at: Mutex<Option<usize>>,
}

impl MockDisplay {
    pub fn new(id: u64) -> Arc<Self> {
        Arc::new(Self {
            id,
            next_buffer: AtomicU64::new(id * 1000),
            calls: Mutex::new(DisplayCalls::default()),
            listener: Mutex::new(None),
            fail_attach_at: Mutex::new(None),
        })
    }

    pub fn calls(&self) -> MutexGuard<'_, DisplayCalls> {
        lock(&self.calls)
    }

    /// Simulate the display finishing with `buffer_id`.
    pub fn release(&self, buffer_id: u64) {
        let listener = lock(&self.listener).clone();
        if let Some(listener) = listener {
            listener(buffer_id);
        }
    }

    pub fn has_listener(&self) -> bool {
        lock(&self.listener).is_some()
    }
}

impl DisplayQueue for MockDisplay {
    fn id(&self) -> u64 {
        self.id
    }

    fn request_buffer(
        &self,
        format: &OutputFormat,
    ) -> std::result::Result<Arc<GraphicBuffer>, DisplayError> {
        let id = self.next_buffer.fetch_add(1, Ordering::Relaxed);
        self.calls().requested.push(id);
        Ok(Arc::new(GraphicBuffer::new(id, format)))
    }

    fn cancel_buffer(&self, buffer: &Arc<GraphicBuffer>) -> std::result::Result<(), DisplayError> {
        self.calls().cancelled.push(buffer.id());
        Ok(())
    }

    fn flush_buffer(
        &self,
        buffer: &Arc<GraphicBuffer>,
        config: &FlushConfig,
    ) -> std::result::Result<(), DisplayError> {
        self.calls().flushed.push((buffer.id(), *config));
        Ok(())
    }

    fn set_queue_size(&self, size: usize) -> std::result::Result<(), DisplayError> {
        self.calls().queue_size = Some(size);
        Ok(())
    }

    fn set_transform(&self, rotation: Rotation) -> std::result::Result<(), DisplayError> {
        self.calls().transform = Some(rotation);
        Ok(())
    }

    fn set_scaling_mode(&self, mode: ScaleType) -> std::result::Result<(), DisplayError> {
        self.calls().scaling = Some(mode);
        Ok(())
    }

    fn register_release_listener(
        &self,
        listener: ReleaseListener,
    ) -> std::result::Result<(), DisplayError> {
        *lock(&self.listener) = Some(listener);
        self.calls().registered += 1;
        Ok(())
    }

    fn unregister_release_listener(&self) -> std::result::Result<(), DisplayError> {
        *lock(&self.listener) = None;
        self.calls().unregistered += 1;
        Ok(())
    }

    fn attach_buffer_to_queue(
        &self,
        buffer: &Arc<GraphicBuffer>,
    ) -> std::result::Result<(), DisplayError> {
        let mut calls = self.calls();
        if *lock(&self.fail_attach_at) == Some(calls.attached.len()) {
            return Err(DisplayError::Disconnected(self.id));
        }
        calls.attached.push(buffer.id());
        Ok(())
    }

    fn clean_cache(&self) -> std::result::Result<(), DisplayError> {
        self.calls().cache_cleans += 1;
        Ok(())
    }
}

/// Poll `pred` until it holds or the test wait expires.
pub fn eventually(pred: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if pred() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    pred()
}

/// Fill input slot `index` through the recorded handle and queue it.
pub fn feed(
    session: &media_codec::CodecSession,
    callback: &RecordingCallback,
    index: usize,
    data: &[u8],
    pts: i64,
    flags: BufferFlags,
) -> Result<()> {
    let buffer = match callback.input_buffer(index) {
        Some(buffer) => buffer,
        None => session.input_buffer(index)?,
    };
    buffer.write(data)?;
    session.queue_input_buffer(
        index,
        BufferAttr {
            pts,
            size: data.len(),
            offset: 0,
            flags,
        },
    )
}
