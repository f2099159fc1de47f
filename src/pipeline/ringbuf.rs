//! Fixed-depth slot store backing the frame hand-off ring.
//!
//! Slots are allocated once, all at the size established by the first frame,
//! and reused in ring order for the life of the session. Each slot is one
//! anonymous page-aligned mapping serving both the CPU view and the device
//! view of the same backing pages.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use bytes::Bytes;
use crossbeam::utils::CachePadded;
use memmap2::MmapMut;

use crate::error::CaptureError;

/// Number of slots in the ring.
pub const RING_DEPTH: usize = 16;

/// Per-frame metadata recorded alongside the payload at write time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotMeta {
    pub width: u32,
    pub height: u32,
    /// Bits per pixel derived from the mapped payload size.
    pub depth: u32,
    /// Monotonic frame number assigned by the producer.
    pub sequence: u64,
}

/// One fixed-size CPU/device buffer pair plus the metadata of its last write.
struct FrameSlot {
    map: MmapMut,
    meta: SlotMeta,
}

impl FrameSlot {
    fn new(len: usize) -> Result<Self, CaptureError> {
        let map = MmapMut::map_anon(len)
            .map_err(|source| CaptureError::RingAllocation { size: len, source })?;
        Ok(Self {
            map,
            meta: SlotMeta::default(),
        })
    }
}

/// Address of a slot's device-visible mapping.
///
/// The pointed-to bytes stay valid for the slot's lifetime, but their
/// *contents* are only guaranteed to match the frame they were claimed with
/// for `RING_DEPTH - 1` subsequent publishes - after that the producer has
/// wrapped around and rewritten the slot. Consumers needing the payload
/// beyond that window should use the owned copy in
/// [`CapturedFrame::data`](crate::CapturedFrame) instead.
#[derive(Debug, Clone, Copy)]
pub struct DeviceHandle {
    ptr: *const u8,
    len: usize,
}

// SAFETY: the handle is an address into a mapping owned by the ring; it is
// only dereferenced by device APIs that synchronize externally. Sending or
// sharing the address itself is safe.
unsafe impl Send for DeviceHandle {}
unsafe impl Sync for DeviceHandle {}

impl DeviceHandle {
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[derive(Default)]
struct Stats {
    frames_written: AtomicUsize,
    frames_read: AtomicUsize,
}

/// Fixed-depth store of equally sized slots, written by the producer and
/// copied out by consumers.
///
/// Each slot carries its own lock so a producer wrapping onto a slot that a
/// consumer is still copying blocks briefly instead of tearing the read. The
/// ring cursor lock (see [`FrameSignal`](super::sync::FrameSignal)) is never
/// held across these copies.
pub struct SlotRing {
    slots: Vec<Mutex<FrameSlot>>,
    slot_len: usize,

    /// Statistics
    stats: CachePadded<Stats>,
}

impl SlotRing {
    /// Allocate all [`RING_DEPTH`] slots of `slot_len` bytes each.
    ///
    /// Invoked exactly once, on the first successfully validated frame. Any
    /// failure drops the partially built slot set and returns the error: no
    /// partially initialized ring is ever exposed.
    pub fn allocate(slot_len: usize) -> Result<Self, CaptureError> {
        if slot_len == 0 {
            return Err(CaptureError::ZeroSlotSize);
        }
        let mut slots = Vec::with_capacity(RING_DEPTH);
        for _ in 0..RING_DEPTH {
            slots.push(Mutex::new(FrameSlot::new(slot_len)?));
        }
        Ok(Self {
            slots,
            slot_len,
            stats: CachePadded::new(Stats::default()),
        })
    }

    /// Fixed per-slot capacity established at allocation.
    pub fn slot_len(&self) -> usize {
        self.slot_len
    }

    pub fn depth(&self) -> usize {
        self.slots.len()
    }

    /// Copy `data` into slot `index`'s CPU-visible buffer and record `meta`.
    ///
    /// Any length other than the established slot size is rejected and the
    /// slot is left untouched.
    pub fn write(&self, index: usize, data: &[u8], meta: SlotMeta) -> Result<(), CaptureError> {
        if data.len() != self.slot_len {
            return Err(CaptureError::SizeMismatch {
                expected: self.slot_len,
                got: data.len(),
            });
        }
        let mut slot = self.slots[index].lock().unwrap();
        slot.map.copy_from_slice(data);
        slot.meta = meta;
        self.stats.frames_written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Copy slot `index` out into an owned buffer, together with the metadata
    /// of the write that produced it, as one consistent view.
    pub fn read(&self, index: usize) -> (Bytes, SlotMeta) {
        let slot = self.slots[index].lock().unwrap();
        self.stats.frames_read.fetch_add(1, Ordering::Relaxed);
        (Bytes::copy_from_slice(&slot.map), slot.meta)
    }

    /// Device handle for slot `index`. See [`DeviceHandle`] for the validity
    /// window of its contents.
    pub fn device(&self, index: usize) -> DeviceHandle {
        let slot = self.slots[index].lock().unwrap();
        DeviceHandle {
            ptr: slot.map.as_ptr(),
            len: self.slot_len,
        }
    }

    pub fn stats(&self) -> (usize, usize) {
        (
            self.stats.frames_written.load(Ordering::Relaxed),
            self.stats.frames_read.load(Ordering::Relaxed),
        )
    }
}
