//! Optional graphics-display binding.
//!
//! In display mode output slots are backed by [`GraphicBuffer`]s requested from
//! a [`DisplayQueue`]. Rendering flushes a slot's buffer to the display; the
//! display later hands it back through a release listener. Listeners run on a
//! foreign thread, so they only post a [`DisplayEvent`] into the session's
//! channel; the session's display pump applies it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam_channel::{Sender, TrySendError};
use media_codec_types::{PixelFormat, Rotation, ScaleType};

use crate::error::{CodecError, DisplayError, Result};
use crate::format::OutputFormat;
use crate::pool::{BufferPool, Owner, SlotMemory, lock_slot};
use crate::queue::AvailabilityQueue;

/// A display-owned frame buffer.
#[derive(Debug)]
pub struct GraphicBuffer {
    id: u64,
    width: u32,
    height: u32,
    stride: u32,
    pixel_format: PixelFormat,
    data: Mutex<Vec<u8>>,
}

impl GraphicBuffer {
    /// Allocate a zeroed buffer sized for `format`.
    pub fn new(id: u64, format: &OutputFormat) -> Self {
        Self {
            id,
            width: format.width,
            height: format.height,
            stride: format.stride,
            pixel_format: format.pixel_format,
            data: Mutex::new(vec![0; format.frame_size()]),
        }
    }

    /// Low-level identity used to match release notifications.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    pub fn size(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn with_data<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(&self.lock())
    }

    pub fn with_data_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        f(&mut self.lock())
    }
}

/// Parameters used when flushing a buffer to the display.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlushConfig {
    pub pts: i64,
    pub size: usize,
    pub rotation: Rotation,
    pub scale_type: ScaleType,
}

/// Called by a display when it is done with a buffer (argument: buffer id).
pub type ReleaseListener = Arc<dyn Fn(u64) + Send + Sync>;

/// External graphics buffer queue.
pub trait DisplayQueue: Send + Sync {
    /// Unique id of this display instance.
    fn id(&self) -> u64;
    fn request_buffer(&self, format: &OutputFormat) -> std::result::Result<Arc<GraphicBuffer>, DisplayError>;
    /// Return an unrendered buffer.
    fn cancel_buffer(&self, buffer: &Arc<GraphicBuffer>) -> std::result::Result<(), DisplayError>;
    /// Queue a buffer for presentation.
    fn flush_buffer(
        &self,
        buffer: &Arc<GraphicBuffer>,
        config: &FlushConfig,
    ) -> std::result::Result<(), DisplayError>;
    fn set_queue_size(&self, size: usize) -> std::result::Result<(), DisplayError>;
    fn set_transform(&self, rotation: Rotation) -> std::result::Result<(), DisplayError>;
    fn set_scaling_mode(&self, mode: ScaleType) -> std::result::Result<(), DisplayError>;
    fn register_release_listener(&self, listener: ReleaseListener) -> std::result::Result<(), DisplayError>;
    fn unregister_release_listener(&self) -> std::result::Result<(), DisplayError>;
    /// Adopt a buffer allocated by another display.
    fn attach_buffer_to_queue(&self, buffer: &Arc<GraphicBuffer>) -> std::result::Result<(), DisplayError>;
    fn clean_cache(&self) -> std::result::Result<(), DisplayError>;
}

/// Messages posted by display callbacks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisplayEvent {
    Released { display_id: u64, buffer_id: u64 },
}

/// A buffer flushed to the display and awaiting release.
#[derive(Clone, Debug)]
pub struct InFlight {
    pub buffer: Arc<GraphicBuffer>,
    pub flush: FlushConfig,
}

/// Slot index -> buffer awaiting async release.
#[derive(Debug, Default)]
pub struct DisplayBufferMap {
    entries: HashMap<usize, InFlight>,
}

impl DisplayBufferMap {
    pub fn insert(&mut self, index: usize, entry: InFlight) {
        self.entries.insert(index, entry);
    }

    pub fn remove(&mut self, index: usize) -> Option<InFlight> {
        self.entries.remove(&index)
    }

    pub fn get(&self, index: usize) -> Option<&InFlight> {
        self.entries.get(&index)
    }

    /// Exchange the entries of two slots (after a memory swap).
    pub fn swap(&mut self, a: usize, b: usize) {
        let ea = self.entries.remove(&a);
        let eb = self.entries.remove(&b);
        if let Some(e) = ea {
            self.entries.insert(b, e);
        }
        if let Some(e) = eb {
            self.entries.insert(a, e);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Render-side state guarded by the scan lock.
pub(crate) struct Binding {
    current: Option<Arc<dyn DisplayQueue>>,
    in_flight: DisplayBufferMap,
}

/// Session's view of the bound display.
///
/// The binding mutex doubles as the scan lock: rendering, release matching,
/// flush resets and live replacement all hold it, so `DisplayAvailable`
/// order and the in-flight map never change underneath a scan.
pub(crate) struct DisplayInterop {
    binding: Mutex<Binding>,
    events: Sender<DisplayEvent>,
}

pub(crate) type BindingGuard<'a> = MutexGuard<'a, Binding>;

impl DisplayInterop {
    pub(crate) fn new(events: Sender<DisplayEvent>) -> Self {
        Self {
            binding: Mutex::new(Binding {
                current: None,
                in_flight: DisplayBufferMap::default(),
            }),
            events,
        }
    }

    pub(crate) fn lock(&self) -> BindingGuard<'_> {
        self.binding.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn current(&self) -> Option<Arc<dyn DisplayQueue>> {
        self.lock().current.clone()
    }

    pub(crate) fn is_bound(&self) -> bool {
        self.lock().current.is_some()
    }

    /// Listener that forwards releases from display `display_id` as messages.
    fn listener_for(&self, display_id: u64) -> ReleaseListener {
        let tx = self.events.clone();
        Arc::new(move |buffer_id| {
            match tx.try_send(DisplayEvent::Released {
                display_id,
                buffer_id,
            }) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(display_id, buffer_id, "display event channel full, release dropped");
                }
                Err(TrySendError::Disconnected(_)) => {
                    tracing::debug!(display_id, buffer_id, "display release after session teardown");
                }
            }
        })
    }

    /// Bind `display` while no buffers are allocated.
    pub(crate) fn bind(&self, display: Arc<dyn DisplayQueue>) -> Result<()> {
        let mut g = self.lock();
        if let Some(old) = g.current.as_ref() {
            if old.id() == display.id() {
                return Ok(());
            }
        }
        display.register_release_listener(self.listener_for(display.id()))?;
        if let Some(old) = g.current.take() {
            if let Err(e) = old.unregister_release_listener() {
                tracing::warn!(display_id = old.id(), error = %e, "unregister release listener failed");
            }
        }
        let display_id = display.id();
        tracing::info!(display_id, "display bound");
        g.current = Some(display);
        g.in_flight.clear();
        Ok(())
    }

    /// Drop the binding entirely (release).
    pub(crate) fn detach(&self) {
        let mut g = self.lock();
        g.in_flight.clear();
        if let Some(old) = g.current.take() {
            if let Err(e) = old.unregister_release_listener() {
                tracing::warn!(display_id = old.id(), error = %e, "unregister release listener failed");
            }
            if let Err(e) = old.clean_cache() {
                tracing::warn!(display_id = old.id(), error = %e, "clean display cache failed");
            }
            tracing::info!(display_id = old.id(), "display detached");
        }
    }

    /// Push transform, scaling and queue depth to the current display.
    pub(crate) fn apply_settings(&self, queue_size: usize, rotation: Rotation, scale: ScaleType) {
        let Some(display) = self.current() else {
            return;
        };
        let display_id = display.id();
        if let Err(e) = display.set_queue_size(queue_size) {
            tracing::warn!(display_id, error = %e, "set display queue size failed");
        }
        if let Err(e) = display.set_transform(rotation) {
            tracing::warn!(display_id, error = %e, "set display transform failed");
        }
        if let Err(e) = display.set_scaling_mode(scale) {
            tracing::warn!(display_id, error = %e, "set display scaling failed");
        }
    }

    /// Flush a client-owned slot to the display.
    ///
    /// The slot becomes display-owned even if the flush fails; the failure is
    /// logged and the index still joins `display_q`.
    pub(crate) fn render(
        &self,
        pool: &BufferPool,
        display_q: &AvailabilityQueue,
        index: usize,
        rotation: Rotation,
        scale_type: ScaleType,
    ) -> Result<()> {
        let mut g = self.lock();
        let display = g
            .current
            .clone()
            .ok_or_else(|| CodecError::invalid_state("render_output_buffer", "no display bound"))?;
        let slot = pool
            .slot(index)
            .ok_or_else(|| CodecError::invalid_value(format!("no output slot {index}")))?;

        let (buffer, flush) = {
            let mut s = lock_slot(&slot);
            if s.owner != Owner::Client {
                return Err(CodecError::invalid_value(format!(
                    "output slot {index} owned by {}",
                    s.owner
                )));
            }
            let buffer = s.memory.display_buffer().cloned().ok_or_else(|| {
                CodecError::invalid_value(format!("output slot {index} has no display buffer"))
            })?;
            s.owner = Owner::Display;
            let flush = FlushConfig {
                pts: s.attr.pts,
                size: s.attr.size,
                rotation,
                scale_type,
            };
            (buffer, flush)
        };

        match display.flush_buffer(&buffer, &flush) {
            Ok(()) => {
                g.in_flight.insert(index, InFlight { buffer, flush });
            }
            Err(e) => {
                let display_id = display.id();
                tracing::warn!(index, display_id, error = %e, "display flush failed");
            }
        }
        display_q.push(index);
        tracing::debug!(index, "output rendered");
        Ok(())
    }

    /// Match a release against `display_q` and hand the freed slot to the engine.
    ///
    /// Returns the index pushed to `engine_q`, if any.
    pub(crate) fn handle_release(
        &self,
        pool: &BufferPool,
        display_q: &AvailabilityQueue,
        engine_q: &AvailabilityQueue,
        display_id: u64,
        buffer_id: u64,
    ) -> Option<usize> {
        let mut g = self.lock();
        match g.current.as_ref() {
            Some(d) if d.id() == display_id => {}
            _ => {
                tracing::debug!(display_id, buffer_id, "release from superseded display ignored");
                return None;
            }
        }

        let mut order = Vec::with_capacity(display_q.len());
        for _ in 0..display_q.len() {
            match display_q.try_pop() {
                Some(i) => order.push(i),
                None => break,
            }
        }
        let matched = order.iter().position(|&i| {
            pool.slot(i)
                .map(|s| {
                    lock_slot(&s)
                        .memory
                        .display_buffer()
                        .is_some_and(|b| b.id() == buffer_id)
                })
                .unwrap_or(false)
        });
        let Some(pos) = matched else {
            for i in order {
                display_q.push(i);
            }
            tracing::debug!(buffer_id, "release for buffer not awaiting display");
            return None;
        };

        let head = order[0];
        if pos != 0 {
            let other = order[pos];
            swap_memory(pool, head, other);
            g.in_flight.swap(head, other);
            tracing::debug!(head, other, buffer_id, "display release matched out of order");
        }
        g.in_flight.remove(head);
        for &i in &order[1..] {
            display_q.push(i);
        }

        if pool.transfer(head, Owner::Display, Owner::Engine).is_err() {
            return None;
        }
        engine_q.push(head);
        Some(head)
    }

    /// Move every display-owned slot to `next` while streaming.
    ///
    /// On failure the previous display stays bound and the new one is
    /// unregistered again. Same display id is a no-op.
    pub(crate) fn replace(
        &self,
        pool: &BufferPool,
        next: Arc<dyn DisplayQueue>,
        queue_size: usize,
        rotation: Rotation,
        scale_type: ScaleType,
    ) -> Result<bool> {
        let mut g = self.lock();
        let old = g
            .current
            .clone()
            .ok_or_else(|| CodecError::invalid_state("set_output_display", "not in display mode"))?;
        if old.id() == next.id() {
            tracing::debug!(display_id = old.id(), "display replacement with same display ignored");
            return Ok(false);
        }

        next.register_release_listener(self.listener_for(next.id()))?;

        let transfer = || -> std::result::Result<usize, DisplayError> {
            next.set_queue_size(queue_size)?;
            next.set_transform(rotation)?;
            next.set_scaling_mode(scale_type)?;
            let mut moved = 0;
            for index in pool.indices_owned_by(Owner::Display) {
                let Some(slot) = pool.slot(index) else {
                    continue;
                };
                let buffer = match lock_slot(&slot).memory.display_buffer() {
                    Some(b) => b.clone(),
                    None => continue,
                };
                next.attach_buffer_to_queue(&buffer)?;
                if let Some(entry) = g.in_flight.get(index) {
                    next.flush_buffer(&entry.buffer, &entry.flush)?;
                }
                moved += 1;
            }
            Ok(moved)
        };

        let moved = match transfer() {
            Ok(moved) => moved,
            Err(e) => {
                if let Err(e2) = next.unregister_release_listener() {
                    tracing::warn!(display_id = next.id(), error = %e2, "rollback unregister failed");
                }
                tracing::warn!(
                    old = old.id(),
                    new = next.id(),
                    error = %e,
                    "display replacement rolled back"
                );
                return Err(e.into());
            }
        };

        g.current = Some(next.clone());
        drop(g);

        if let Err(e) = old.unregister_release_listener() {
            tracing::warn!(display_id = old.id(), error = %e, "unregister release listener failed");
        }
        if let Err(e) = old.clean_cache() {
            tracing::warn!(display_id = old.id(), error = %e, "clean display cache failed");
        }
        tracing::info!(old = old.id(), new = next.id(), moved, "display replaced");
        Ok(true)
    }
}

impl Binding {
    pub(crate) fn clear_in_flight(&mut self) {
        self.in_flight.clear();
    }

    pub(crate) fn display(&self) -> Option<&Arc<dyn DisplayQueue>> {
        self.current.as_ref()
    }
}

/// Exchange the backing memory of two slots; indices and owners stay put.
fn swap_memory(pool: &BufferPool, a: usize, b: usize) {
    let (Some(sa), Some(sb)) = (pool.slot(a), pool.slot(b)) else {
        return;
    };
    let (first, second) = if a < b { (sa, sb) } else { (sb, sa) };
    let mut ga = lock_slot(&first);
    let mut gb = lock_slot(&second);
    std::mem::swap(&mut ga.memory, &mut gb.memory);
    std::mem::swap(&mut ga.geometry, &mut gb.geometry);
}

/// Re-acquire display memory for one engine-owned slot at `format`.
pub(crate) fn reacquire(
    display: &dyn DisplayQueue,
    pool: &BufferPool,
    index: usize,
    format: OutputFormat,
) -> Result<()> {
    let buffer = display.request_buffer(&format)?;
    let old = pool.update_slot(index, SlotMemory::Display(buffer), Some(format))?;
    if let SlotMemory::Display(old) = old {
        if let Err(e) = display.cancel_buffer(&old) {
            tracing::warn!(index, error = %e, "cancel superseded display buffer failed");
        }
    }
    Ok(())
}
