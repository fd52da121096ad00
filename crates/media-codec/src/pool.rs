//! Fixed-size, indexed buffer pools.
//!
//! A pool owns one [`BufferSlot`] per index. Every slot carries an [`Owner`]
//! tag naming the only party allowed to touch its memory; tags change only
//! through [`BufferPool::transfer`] (or the bulk resets used on flush/stop),
//! always under the slot's own mutex.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::display::{DisplayQueue, GraphicBuffer};
use crate::error::{CodecError, Result};
use crate::format::OutputFormat;

/// Per-buffer flags shared by input and output slots.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct BufferFlags(u32);

impl BufferFlags {
    pub const NONE: BufferFlags = BufferFlags(0);
    pub const EOS: BufferFlags = BufferFlags(1);
    pub const SYNC_FRAME: BufferFlags = BufferFlags(1 << 1);
    /// Payload is an incomplete frame.
    pub const PARTIAL_FRAME: BufferFlags = BufferFlags(1 << 2);
    /// Payload carries codec-specific data (parameter sets).
    pub const CODEC_DATA: BufferFlags = BufferFlags(1 << 3);

    pub fn contains(self, other: BufferFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for BufferFlags {
    type Output = BufferFlags;

    fn bitor(self, rhs: BufferFlags) -> BufferFlags {
        BufferFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for BufferFlags {
    fn bitor_assign(&mut self, rhs: BufferFlags) {
        self.0 |= rhs.0;
    }
}

/// Payload description attached to a slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BufferAttr {
    pub pts: i64,
    pub size: usize,
    pub offset: usize,
    pub flags: BufferFlags,
}

/// Party currently owning a slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Owner {
    /// Held by the pool, not handed out.
    Free,
    Engine,
    Client,
    Display,
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Owner::Free => "free",
            Owner::Engine => "engine",
            Owner::Client => "client",
            Owner::Display => "display",
        })
    }
}

/// Input or output side of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Port {
    Input,
    Output,
}

/// Backing memory of a slot.
#[derive(Debug, Default)]
pub enum SlotMemory {
    /// Dropped or cancelled; re-acquired before next use.
    #[default]
    Empty,
    Plain(Vec<u8>),
    Display(Arc<GraphicBuffer>),
}

impl SlotMemory {
    pub fn capacity(&self) -> usize {
        match self {
            SlotMemory::Empty => 0,
            SlotMemory::Plain(v) => v.len(),
            SlotMemory::Display(b) => b.size(),
        }
    }

    pub fn display_buffer(&self) -> Option<&Arc<GraphicBuffer>> {
        match self {
            SlotMemory::Display(b) => Some(b),
            _ => None,
        }
    }

    /// Run `f` over the bytes, whatever backs them.
    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        match self {
            SlotMemory::Empty => f(&[]),
            SlotMemory::Plain(v) => f(v),
            SlotMemory::Display(b) => b.with_data(|d| f(d)),
        }
    }

    pub fn with_bytes_mut<R>(&mut self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        match self {
            SlotMemory::Empty => f(&mut []),
            SlotMemory::Plain(v) => f(v),
            SlotMemory::Display(b) => b.with_data_mut(|d| f(d)),
        }
    }
}

/// Allocate zeroed plain memory without aborting on exhaustion.
pub fn alloc_plain(size: usize) -> Option<Vec<u8>> {
    let mut v = Vec::new();
    v.try_reserve_exact(size).ok()?;
    v.resize(size, 0);
    Some(v)
}

/// One entry of a pool.
#[derive(Debug)]
pub struct BufferSlot {
    pub index: usize,
    pub owner: Owner,
    pub memory: SlotMemory,
    /// Geometry the memory was allocated for (video output only).
    pub geometry: Option<OutputFormat>,
    pub attr: BufferAttr,
    /// First output after start/flush.
    pub first_frame: bool,
}

impl BufferSlot {
    fn new(index: usize, memory: SlotMemory, geometry: Option<OutputFormat>) -> Self {
        Self {
            index,
            owner: Owner::Free,
            memory,
            geometry,
            attr: BufferAttr::default(),
            first_frame: false,
        }
    }

    pub fn is_eos(&self) -> bool {
        self.attr.flags.contains(BufferFlags::EOS)
    }
}

pub(crate) fn lock_slot(slot: &Mutex<BufferSlot>) -> MutexGuard<'_, BufferSlot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Indexed array of slots for one port.
#[derive(Debug)]
pub struct BufferPool {
    port: Port,
    slots: Mutex<Vec<Arc<Mutex<BufferSlot>>>>,
}

impl BufferPool {
    pub fn new(port: Port) -> Self {
        Self {
            port,
            slots: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<Mutex<BufferSlot>>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn port(&self) -> Port {
        self.port
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn is_allocated(&self) -> bool {
        !self.is_empty()
    }

    pub fn slot(&self, index: usize) -> Option<Arc<Mutex<BufferSlot>>> {
        self.lock().get(index).cloned()
    }

    fn all(&self) -> Vec<Arc<Mutex<BufferSlot>>> {
        self.lock().clone()
    }

    /// Allocate `count` plain slots of `size` bytes.
    ///
    /// Fails with `NoMemory`, leaving the pool untouched, when fewer than
    /// `min` slots could be obtained.
    pub fn allocate_plain(
        &self,
        count: usize,
        size: usize,
        geometry: Option<OutputFormat>,
        min: usize,
    ) -> Result<usize> {
        let mut slots = Vec::with_capacity(count);
        for index in 0..count {
            match alloc_plain(size) {
                Some(mem) => slots.push(BufferSlot::new(index, SlotMemory::Plain(mem), geometry)),
                None => {
                    tracing::warn!(port = ?self.port, index, size, "slot allocation failed");
                    break;
                }
            }
        }
        self.install(slots, min)
    }

    /// Allocate `count` slots backed by buffers requested from `display`.
    ///
    /// Buffers already obtained are cancelled back if the minimum is not met.
    pub fn allocate_display(
        &self,
        count: usize,
        geometry: OutputFormat,
        display: &dyn DisplayQueue,
        min: usize,
    ) -> Result<usize> {
        let mut slots = Vec::with_capacity(count);
        for index in 0..count {
            match display.request_buffer(&geometry) {
                Ok(buffer) => slots.push(BufferSlot::new(
                    index,
                    SlotMemory::Display(buffer),
                    Some(geometry),
                )),
                Err(e) => {
                    tracing::warn!(index, error = %e, "display buffer request failed");
                    break;
                }
            }
        }
        if slots.len() < min {
            for slot in &slots {
                if let SlotMemory::Display(buffer) = &slot.memory {
                    if let Err(e) = display.cancel_buffer(buffer) {
                        tracing::warn!(index = slot.index, error = %e, "cancel display buffer failed");
                    }
                }
            }
        }
        self.install(slots, min)
    }

    fn install(&self, slots: Vec<BufferSlot>, min: usize) -> Result<usize> {
        let got = slots.len();
        if got < min {
            return Err(CodecError::no_memory(format!(
                "{:?} pool: obtained {got} slots, need at least {min}",
                self.port
            )));
        }
        *self.lock() = slots
            .into_iter()
            .map(|s| Arc::new(Mutex::new(s)))
            .collect();
        tracing::info!(port = ?self.port, slots = got, "buffer pool allocated");
        Ok(got)
    }

    /// Replace one slot's memory for a format change. The owner tag is kept.
    pub fn update_slot(
        &self,
        index: usize,
        memory: SlotMemory,
        geometry: Option<OutputFormat>,
    ) -> Result<SlotMemory> {
        let slot = self
            .slot(index)
            .ok_or_else(|| CodecError::invalid_value(format!("no slot {index}")))?;
        let mut g = lock_slot(&slot);
        g.geometry = geometry;
        Ok(std::mem::replace(&mut g.memory, memory))
    }

    /// Move a slot from `from` to `to`. Fails without change if the tag differs.
    pub fn transfer(&self, index: usize, from: Owner, to: Owner) -> Result<()> {
        let slot = self
            .slot(index)
            .ok_or_else(|| CodecError::invalid_value(format!("no {:?} slot {index}", self.port)))?;
        let mut g = lock_slot(&slot);
        if g.owner != from {
            return Err(CodecError::invalid_value(format!(
                "{:?} slot {index} owned by {}, expected {from}",
                self.port, g.owner
            )));
        }
        g.owner = to;
        Ok(())
    }

    pub fn owner(&self, index: usize) -> Option<Owner> {
        self.slot(index).map(|s| lock_slot(&s).owner)
    }

    pub fn owners(&self) -> Vec<Owner> {
        self.all().iter().map(|s| lock_slot(s).owner).collect()
    }

    /// Indices currently tagged `owner`.
    pub fn indices_owned_by(&self, owner: Owner) -> Vec<usize> {
        self.all()
            .iter()
            .filter_map(|s| {
                let g = lock_slot(s);
                (g.owner == owner).then_some(g.index)
            })
            .collect()
    }

    /// Move every `Free` slot to `to`, returning the moved indices.
    pub fn hand_out_free(&self, to: Owner) -> Vec<usize> {
        let mut moved = Vec::new();
        for slot in self.all() {
            let mut g = lock_slot(&slot);
            if g.owner == Owner::Free {
                g.owner = to;
                g.attr = BufferAttr::default();
                moved.push(g.index);
            }
        }
        moved
    }

    /// Return every slot to `Free` and invalidate contents.
    ///
    /// Display-backed memory the display does not hold is cancelled back; memory
    /// the display holds is dropped from the slot and re-acquired later.
    pub fn release_all(&self, display: Option<&dyn DisplayQueue>) {
        let mut cancelled = 0usize;
        for slot in self.all() {
            let mut g = lock_slot(&slot);
            if let SlotMemory::Display(buffer) = &g.memory {
                if g.owner != Owner::Display {
                    if let Some(display) = display {
                        if let Err(e) = display.cancel_buffer(buffer) {
                            tracing::warn!(index = g.index, error = %e, "cancel display buffer failed");
                        }
                    }
                    cancelled += 1;
                }
                g.memory = SlotMemory::Empty;
                g.geometry = None;
            }
            g.owner = Owner::Free;
            g.attr = BufferAttr::default();
            g.first_frame = false;
        }
        tracing::debug!(port = ?self.port, cancelled, "buffer pool released");
    }

    /// Drop every slot.
    pub fn clear(&self) {
        let slots = std::mem::take(&mut *self.lock());
        if !slots.is_empty() {
            tracing::info!(port = ?self.port, slots = slots.len(), "buffer pool destroyed");
        }
    }
}

/// Client-side handle on one slot.
///
/// Reads and writes succeed only while the slot is owned by the client.
#[derive(Clone, Debug)]
pub struct CodecBuffer {
    slot: Arc<Mutex<BufferSlot>>,
}

impl CodecBuffer {
    pub(crate) fn new(slot: Arc<Mutex<BufferSlot>>) -> Self {
        Self { slot }
    }

    fn client_guard(&self) -> Result<MutexGuard<'_, BufferSlot>> {
        let g = lock_slot(&self.slot);
        if g.owner != Owner::Client {
            return Err(CodecError::invalid_state("buffer access", g.owner));
        }
        Ok(g)
    }

    pub fn index(&self) -> usize {
        lock_slot(&self.slot).index
    }

    pub fn capacity(&self) -> usize {
        lock_slot(&self.slot).memory.capacity()
    }

    pub fn owner(&self) -> Owner {
        lock_slot(&self.slot).owner
    }

    pub fn attr(&self) -> BufferAttr {
        lock_slot(&self.slot).attr
    }

    /// Copy `data` to the start of the slot; returns the bytes written.
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        let mut g = self.client_guard()?;
        let capacity = g.memory.capacity();
        if data.len() > capacity {
            return Err(CodecError::invalid_value(format!(
                "payload {} exceeds slot capacity {capacity}",
                data.len()
            )));
        }
        g.memory.with_bytes_mut(|dst| dst[..data.len()].copy_from_slice(data));
        Ok(data.len())
    }

    /// Copy out the valid payload (`offset..offset + size`).
    pub fn read(&self) -> Result<Vec<u8>> {
        let g = self.client_guard()?;
        let attr = g.attr;
        Ok(g.memory.with_bytes(|bytes| {
            let end = (attr.offset + attr.size).min(bytes.len());
            let start = attr.offset.min(end);
            bytes[start..end].to_vec()
        }))
    }

    /// Display buffer id, for display-backed slots.
    pub fn display_buffer_id(&self) -> Option<u64> {
        lock_slot(&self.slot).memory.display_buffer().map(|b| b.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::{FlushConfig, ReleaseListener};
    use crate::error::DisplayError;
    use media_codec_types::{PixelFormat, Rotation, ScaleType};

    #[test]
    fn allocate_plain_sets_free_owner() {
        let pool = BufferPool::new(Port::Input);
        assert_eq!(pool.allocate_plain(4, 64, None, 2).unwrap(), 4);
        assert_eq!(pool.owners(), vec![Owner::Free; 4]);
        assert_eq!(pool.slot(3).map(|s| lock_slot(&s).memory.capacity()), Some(64));
    }

    #[test]
    fn allocate_below_minimum_is_no_memory() {
        let pool = BufferPool::new(Port::Input);
        let err = pool.allocate_plain(1, 64, None, 2).unwrap_err();
        assert!(matches!(err, CodecError::NoMemory(_)));
        assert!(!pool.is_allocated());
    }

    #[test]
    fn transfer_checks_current_owner() {
        let pool = BufferPool::new(Port::Output);
        pool.allocate_plain(2, 8, None, 2).unwrap();
        pool.transfer(0, Owner::Free, Owner::Engine).unwrap();
        let err = pool.transfer(0, Owner::Client, Owner::Display).unwrap_err();
        assert!(matches!(err, CodecError::InvalidValue(_)));
        assert_eq!(pool.owner(0), Some(Owner::Engine));
        assert!(pool.transfer(9, Owner::Free, Owner::Engine).is_err());
    }

    #[test]
    fn update_slot_preserves_owner() {
        let pool = BufferPool::new(Port::Output);
        pool.allocate_plain(2, 8, None, 2).unwrap();
        pool.transfer(1, Owner::Free, Owner::Engine).unwrap();
        let old = pool
            .update_slot(1, SlotMemory::Plain(vec![0; 32]), None)
            .unwrap();
        assert_eq!(old.capacity(), 8);
        assert_eq!(pool.owner(1), Some(Owner::Engine));
        assert_eq!(pool.slot(1).map(|s| lock_slot(&s).memory.capacity()), Some(32));
    }

    #[test]
    fn release_all_resets_owners_and_attrs() {
        let pool = BufferPool::new(Port::Input);
        pool.allocate_plain(3, 8, None, 2).unwrap();
        assert_eq!(pool.hand_out_free(Owner::Client), vec![0, 1, 2]);
        if let Some(slot) = pool.slot(0) {
            lock_slot(&slot).attr.size = 4;
        }
        pool.release_all(None);
        assert_eq!(pool.owners(), vec![Owner::Free; 3]);
        assert_eq!(pool.slot(0).map(|s| lock_slot(&s).attr.size), Some(0));
    }

    #[test]
    fn codec_buffer_requires_client_ownership() {
        let pool = BufferPool::new(Port::Input);
        pool.allocate_plain(2, 8, None, 2).unwrap();
        let buf = CodecBuffer::new(pool.slot(0).unwrap());
        assert!(buf.write(b"abc").is_err());

        pool.transfer(0, Owner::Free, Owner::Client).unwrap();
        assert_eq!(buf.write(b"abc").unwrap(), 3);
        assert!(buf.write(&[0u8; 9]).is_err());
        if let Some(slot) = pool.slot(0) {
            lock_slot(&slot).attr.size = 3;
        }
        assert_eq!(buf.read().unwrap(), b"abc".to_vec());
    }

    /// Hands out `limit` buffers, then refuses; cancels always fail.
    struct StingyDisplay {
        limit: u64,
        handed: Mutex<u64>,
        cancelled: Mutex<Vec<u64>>,
    }

    impl DisplayQueue for StingyDisplay {
        fn id(&self) -> u64 {
            1
        }
        fn request_buffer(
            &self,
            format: &OutputFormat,
        ) -> std::result::Result<Arc<GraphicBuffer>, DisplayError> {
            let mut handed = self.handed.lock().unwrap();
            if *handed == self.limit {
                return Err(DisplayError::NoBuffer);
            }
            *handed += 1;
            Ok(Arc::new(GraphicBuffer::new(*handed, format)))
        }
        fn cancel_buffer(&self, buffer: &Arc<GraphicBuffer>) -> std::result::Result<(), DisplayError> {
            self.cancelled.lock().unwrap().push(buffer.id());
            Err(DisplayError::UnknownBuffer(buffer.id()))
        }
        fn flush_buffer(
            &self,
            _buffer: &Arc<GraphicBuffer>,
            _config: &FlushConfig,
        ) -> std::result::Result<(), DisplayError> {
            Ok(())
        }
        fn set_queue_size(&self, _size: usize) -> std::result::Result<(), DisplayError> {
            Ok(())
        }
        fn set_transform(&self, _rotation: Rotation) -> std::result::Result<(), DisplayError> {
            Ok(())
        }
        fn set_scaling_mode(&self, _mode: ScaleType) -> std::result::Result<(), DisplayError> {
            Ok(())
        }
        fn register_release_listener(
            &self,
            _listener: ReleaseListener,
        ) -> std::result::Result<(), DisplayError> {
            Ok(())
        }
        fn unregister_release_listener(&self) -> std::result::Result<(), DisplayError> {
            Ok(())
        }
        fn attach_buffer_to_queue(
            &self,
            _buffer: &Arc<GraphicBuffer>,
        ) -> std::result::Result<(), DisplayError> {
            Ok(())
        }
        fn clean_cache(&self) -> std::result::Result<(), DisplayError> {
            Ok(())
        }
    }

    #[test]
    fn short_display_allocation_cancels_what_it_got() {
        let display = StingyDisplay {
            limit: 1,
            handed: Mutex::new(0),
            cancelled: Mutex::new(Vec::new()),
        };
        let pool = BufferPool::new(Port::Output);
        let format = OutputFormat::new(32, 32, PixelFormat::Nv12);
        let err = pool.allocate_display(3, format, &display, 2).unwrap_err();
        assert!(matches!(err, CodecError::NoMemory(_)));
        assert!(!pool.is_allocated());
        assert_eq!(*display.cancelled.lock().unwrap(), vec![1]);
    }

    #[test]
    fn flags_combine() {
        let flags = BufferFlags::EOS | BufferFlags::SYNC_FRAME;
        assert!(flags.contains(BufferFlags::EOS));
        assert!(!flags.contains(BufferFlags::CODEC_DATA));
    }
}
