//! Fixed-size ring of transfer slots.
//!
//! The pool owns the slots and their synchronization strategy. Streams address
//! slots by index (`cursor % count`); the pool never reorders them.

use std::sync::Arc;

use crate::device::{HostMemory, TransferDevice, TransferDirection};
use crate::error::{Result, StreamError};
use crate::format::FrameLayout;

use super::handler::{FrameLease, Latch, ReleaseSignal};
use super::sync::{self, Slot, SlotSync, SyncKind, WaitPolicy};

pub(crate) struct BufferPool<D: TransferDevice> {
    slots: Vec<Slot<D>>,
    count: usize,
    direction: TransferDirection,
    layout: FrameLayout,
    sync: Box<dyn SlotSync<D>>,
    policy: WaitPolicy,
}

impl<D: TransferDevice> BufferPool<D> {
    /// # Panics
    /// If `count` is zero.
    pub(crate) fn new(count: usize, direction: TransferDirection, sync: Box<dyn SlotSync<D>>, policy: WaitPolicy) -> Self {
        assert!(count >= 1, "a stream needs at least one buffer");
        Self {
            slots: Vec::with_capacity(count),
            count,
            direction,
            layout: FrameLayout::EMPTY,
            sync,
            policy,
        }
    }

    #[inline]
    pub(crate) fn count(&self) -> usize {
        self.count
    }

    #[inline]
    pub(crate) fn layout(&self) -> FrameLayout {
        self.layout
    }

    #[inline]
    pub(crate) fn is_allocated(&self) -> bool {
        !self.slots.is_empty()
    }

    pub(crate) fn sync_kind(&self) -> SyncKind {
        self.sync.kind()
    }

    /// Slot index for a monotonically increasing cursor.
    #[inline]
    pub(crate) fn index(&self, cursor: u64) -> usize {
        (cursor % self.count as u64) as usize
    }

    /// Changes the ring size for the next allocation. The ring must be drained.
    pub(crate) fn set_count(&mut self, count: usize) {
        assert!(count >= 1, "a stream needs at least one buffer");
        debug_assert!(self.slots.is_empty(), "ring resized while allocated");
        self.count = count;
    }

    /// Drains the ring and reallocates it for `layout`. An empty layout leaves
    /// the ring unallocated.
    pub(crate) fn resize(&mut self, device: &mut D, layout: FrameLayout) -> Result<()> {
        self.destroy(device)?;
        self.layout = layout;
        if layout.is_empty() {
            return Ok(());
        }

        let pinned = self.sync.kind() == SyncKind::FenceBased;
        for i in 0..self.count {
            let host = Arc::new(if pinned {
                HostMemory::pinned(layout.len())
            } else {
                HostMemory::staging(layout.len())
            });
            let buffer = device.create_buffer(&layout, self.direction, pinned.then_some(&host))?;
            log::trace!("slot {i}: {} bytes at {:#x}", host.len(), host.address());
            self.slots.push(Slot::new(buffer, host));
        }

        log::debug!(
            "{:?} ring: {} x {}x{} (stride {}, {:?})",
            self.direction,
            self.count,
            layout.width(),
            layout.height(),
            layout.stride,
            self.sync.kind(),
        );
        Ok(())
    }

    /// Waits for every handler and every GPU command, then frees all slots.
    ///
    /// Idempotent. Every slot is drained even when one fails; the first error
    /// is returned.
    pub(crate) fn destroy(&mut self, device: &mut D) -> Result<()> {
        if self.slots.is_empty() {
            return Ok(());
        }

        let mut first: Option<StreamError> = None;
        for (i, slot) in self.slots.iter_mut().enumerate() {
            let drained = sync::wait_for_processing_complete(self.sync.as_ref(), device, slot, i, self.policy)
                .and_then(|_| self.sync.wait_for_gpu(device, slot, self.policy));
            if let Err(err) = drained {
                log::error!("slot {i}: drain failed: {err}");
                first.get_or_insert(err);
            }
        }

        log::debug!("{:?} ring: released {} slots", self.direction, self.slots.len());
        self.slots.clear();
        first.map_or(Ok(()), Err)
    }

    #[inline]
    pub(crate) fn is_busy(&self, i: usize) -> bool {
        self.slots[i].is_busy()
    }

    #[inline]
    pub(crate) fn buffer(&self, i: usize) -> &D::Buffer {
        &self.slots[i].buffer
    }

    /// Blocking reclaim. Returns whether the handler still held the slot.
    pub(crate) fn wait_for_processing_complete(&mut self, device: &mut D, i: usize) -> Result<bool> {
        sync::wait_for_processing_complete(self.sync.as_ref(), device, &mut self.slots[i], i, self.policy)
    }

    /// Non-blocking reclaim. Returns whether the slot is free now.
    pub(crate) fn try_reclaim(&mut self, device: &mut D, i: usize) -> Result<bool> {
        sync::try_reclaim(self.sync.as_ref(), device, &mut self.slots[i])
    }

    pub(crate) fn wait_for_gpu(&mut self, device: &mut D, i: usize) -> Result<()> {
        self.sync.wait_for_gpu(device, &mut self.slots[i], self.policy)
    }

    /// Ends host access to slot `i` before a GPU command reads it.
    pub(crate) fn release_host(&mut self, device: &mut D, i: usize) -> Result<()> {
        self.sync.release_host(device, &mut self.slots[i])
    }

    /// Records that a GPU command touching slot `i` was just queued.
    pub(crate) fn submitted(&mut self, device: &mut D, i: usize) {
        self.sync.submitted(device, &mut self.slots[i]);
    }

    /// Duplicates the frame in slot `from` into slot `to`.
    pub(crate) fn copy_slot(&mut self, device: &mut D, from: usize, to: usize) -> Result<()> {
        let (from, to) = pair_mut(&mut self.slots, from, to);
        self.sync.copy_slot(device, from, to, &self.layout, self.policy)
    }

    /// Hands slot `i` to a handler.
    pub(crate) fn lease(&mut self, device: &mut D, i: usize, frame: u64) -> Result<FrameLease> {
        let access = self.direction.host_access();
        let slot = &mut self.slots[i];
        self.sync.acquire_host(device, slot, access, self.policy)?;

        let latch = Latch::new();
        slot.latch = Some(Arc::clone(&latch));
        Ok(FrameLease::new(
            self.layout,
            access,
            frame,
            Arc::clone(&slot.host),
            ReleaseSignal::new(latch),
        ))
    }
}

fn pair_mut<T>(items: &mut [T], a: usize, b: usize) -> (&mut T, &mut T) {
    assert_ne!(a, b, "slot copied onto itself");
    if a < b {
        let (lo, hi) = items.split_at_mut(b);
        (&mut lo[a], &mut hi[0])
    } else {
        let (lo, hi) = items.split_at_mut(a);
        (&mut hi[0], &mut lo[b])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::device::SoftwareDevice;
    use crate::format::Extent;
    use crate::stream::StreamConfig;

    fn pool(device: &SoftwareDevice, count: usize, pinned: bool) -> BufferPool<SoftwareDevice> {
        let sync = sync::select(&device.capabilities(), pinned);
        BufferPool::new(count, TransferDirection::Readback, sync, WaitPolicy::from(&StreamConfig::default()))
    }

    fn layout(w: u32, h: u32) -> FrameLayout {
        FrameLayout::new(Extent::new(w, h), 256).unwrap()
    }

    // ── allocation ────────────────────────────────────────────────────────

    #[test]
    fn resize_allocates_count_slots() {
        let mut device = SoftwareDevice::new();
        let mut pool = pool(&device, 3, true);

        pool.resize(&mut device, layout(4, 4)).unwrap();
        assert!(pool.is_allocated());
        assert_eq!(device.counters().buffers_alive, 3);

        pool.resize(&mut device, layout(8, 8)).unwrap();
        assert_eq!(device.counters().buffers_alive, 3);
        assert_eq!(device.counters().buffers_created, 6);
    }

    #[test]
    fn empty_layout_leaves_ring_unallocated() {
        let mut device = SoftwareDevice::new();
        let mut pool = pool(&device, 2, true);
        pool.resize(&mut device, layout(0, 4)).unwrap();
        assert!(!pool.is_allocated());
        assert_eq!(device.counters().buffers_created, 0);
    }

    #[test]
    #[should_panic(expected = "at least one buffer")]
    fn zero_buffers_panics() {
        let device = SoftwareDevice::new();
        let _ = pool(&device, 0, true);
    }

    #[test]
    fn index_wraps() {
        let device = SoftwareDevice::new();
        let pool = pool(&device, 3, true);
        assert_eq!(pool.index(0), 0);
        assert_eq!(pool.index(4), 1);
        assert_eq!(pool.index(u64::MAX), (u64::MAX % 3) as usize);
    }

    // ── leasing ───────────────────────────────────────────────────────────

    #[test]
    fn leased_slot_is_busy_until_reclaimed() {
        let mut device = SoftwareDevice::new();
        let mut pool = pool(&device, 2, false);
        pool.resize(&mut device, layout(2, 2)).unwrap();

        let frame = pool.lease(&mut device, 1, 7).unwrap();
        assert_eq!(frame.index(), 7);
        assert!(pool.is_busy(1));
        assert!(pool.buffer(1).is_mapped());

        frame.release();
        assert!(pool.is_busy(1));
        assert!(!pool.wait_for_processing_complete(&mut device, 1).unwrap());
        assert!(!pool.is_busy(1));
        assert!(!pool.buffer(1).is_mapped());
    }

    #[test]
    fn destroy_drains_and_is_idempotent() {
        let mut device = SoftwareDevice::new();
        let mut pool = pool(&device, 2, false);
        pool.resize(&mut device, layout(2, 2)).unwrap();
        drop(pool.lease(&mut device, 0, 0).unwrap());

        pool.destroy(&mut device).unwrap();
        pool.destroy(&mut device).unwrap();
        let counters = device.counters();
        assert_eq!(counters.buffers_alive, 0);
        assert_eq!(counters.maps, counters.unmaps);
    }

    #[test]
    fn copy_slot_in_either_direction() {
        let mut device = SoftwareDevice::new();
        let mut pool = pool(&device, 3, true);
        pool.resize(&mut device, layout(1, 1)).unwrap();

        device.write_buffer(pool.buffer(2), &[1, 2, 3, 4]).unwrap();
        pool.copy_slot(&mut device, 2, 0).unwrap();
        assert_eq!(&pool.buffer(0).contents()[..4], &[1, 2, 3, 4]);

        device.write_buffer(pool.buffer(0), &[5, 6, 7, 8]).unwrap();
        pool.copy_slot(&mut device, 0, 1).unwrap();
        assert_eq!(&pool.buffer(1).contents()[..4], &[5, 6, 7, 8]);
    }
}
