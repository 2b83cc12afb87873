//! Completion tracking for ring slots.
//!
//! Each slot is owned by exactly one of the render thread, the GPU or the
//! handler at any time. Two strategies enforce the hand-offs:
//!
//! - [`FenceBased`]: pinned host memory aliases the transfer buffer, so the
//!   host view is always addressable. The GPU is fenced after each command
//!   touching the slot and the fence is waited on before the host or the next
//!   command uses it.
//! - [`MapBased`]: the host view exists only while the buffer is mapped.
//!   Mapping blocks until prior GPU access finishes; unmapping is deferred
//!   until the handler returns the slot.
//!
//! The strategy is chosen once per stream from the device capabilities.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::device::{DeviceCapabilities, HostMemory, MapAccess, TransferDevice};
use crate::error::Result;
use crate::format::FrameLayout;

use super::config::StreamConfig;
use super::handler::Latch;

/// One element of the transfer ring.
pub(crate) struct Slot<D: TransferDevice> {
    pub(crate) buffer: D::Buffer,
    pub(crate) host: Arc<HostMemory>,
    /// Outstanding GPU work on this slot (fence strategy only).
    pub(crate) fence: Option<D::Fence>,
    /// Present while a handler holds, or has held and not yet returned, the slot.
    pub(crate) latch: Option<Arc<Latch>>,
    /// Current mapping (map strategy only).
    pub(crate) mapped: Option<MapAccess>,
}

impl<D: TransferDevice> Slot<D> {
    pub(crate) fn new(buffer: D::Buffer, host: Arc<HostMemory>) -> Self {
        Self {
            buffer,
            host,
            fence: None,
            latch: None,
            mapped: None,
        }
    }

    #[inline]
    pub(crate) fn is_busy(&self) -> bool {
        self.latch.is_some()
    }
}

/// Wait ceilings taken from [`StreamConfig`].
#[derive(Debug, Copy, Clone)]
pub(crate) struct WaitPolicy {
    pub(crate) gpu_timeout: Duration,
    pub(crate) stall_warning: Duration,
}

impl From<&StreamConfig> for WaitPolicy {
    fn from(config: &StreamConfig) -> Self {
        Self {
            gpu_timeout: config.gpu_timeout,
            stall_warning: config.stall_warning,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SyncKind {
    FenceBased,
    MapBased,
}

/// Slot synchronization strategy.
pub(crate) trait SlotSync<D: TransferDevice> {
    fn kind(&self) -> SyncKind;

    /// Called right after a GPU command reading or writing `slot` was queued.
    fn submitted(&self, device: &mut D, slot: &mut Slot<D>);

    /// Makes the host view of `slot` safe for CPU access.
    fn acquire_host(&self, device: &mut D, slot: &mut Slot<D>, access: MapAccess, policy: WaitPolicy) -> Result<()>;

    /// Ends CPU access so the GPU may use the buffer again.
    fn release_host(&self, device: &mut D, slot: &mut Slot<D>) -> Result<()>;

    /// Blocks until GPU work recorded for `slot` has completed.
    fn wait_for_gpu(&self, device: &mut D, slot: &mut Slot<D>, policy: WaitPolicy) -> Result<()>;

    /// Copies the frame in `from` (just queued) into `to`, synchronously.
    fn copy_slot(
        &self,
        device: &mut D,
        from: &mut Slot<D>,
        to: &mut Slot<D>,
        layout: &FrameLayout,
        policy: WaitPolicy,
    ) -> Result<()>;
}

/// Pinned memory + explicit fences.
#[derive(Debug, Default)]
pub(crate) struct FenceBased;

/// Map/unmap on demand; synchronization is implicit in `map`.
#[derive(Debug, Default)]
pub(crate) struct MapBased {
    buffer_copy: bool,
}

/// Picks the strategy for a stream.
pub(crate) fn select<D: TransferDevice>(caps: &DeviceCapabilities, prefer_pinned: bool) -> Box<dyn SlotSync<D>> {
    if prefer_pinned && caps.pinned_memory {
        Box::new(FenceBased)
    } else {
        Box::new(MapBased {
            buffer_copy: caps.buffer_copy,
        })
    }
}

impl<D: TransferDevice> SlotSync<D> for FenceBased {
    fn kind(&self) -> SyncKind {
        SyncKind::FenceBased
    }

    fn submitted(&self, device: &mut D, slot: &mut Slot<D>) {
        slot.fence = Some(device.insert_fence());
    }

    fn acquire_host(&self, device: &mut D, slot: &mut Slot<D>, _access: MapAccess, policy: WaitPolicy) -> Result<()> {
        self.wait_for_gpu(device, slot, policy)
    }

    fn release_host(&self, _device: &mut D, _slot: &mut Slot<D>) -> Result<()> {
        Ok(())
    }

    fn wait_for_gpu(&self, device: &mut D, slot: &mut Slot<D>, policy: WaitPolicy) -> Result<()> {
        match slot.fence.take() {
            Some(fence) => device.wait_fence(fence, policy.gpu_timeout),
            None => Ok(()),
        }
    }

    fn copy_slot(
        &self,
        device: &mut D,
        from: &mut Slot<D>,
        to: &mut Slot<D>,
        _layout: &FrameLayout,
        policy: WaitPolicy,
    ) -> Result<()> {
        self.wait_for_gpu(device, from, policy)?;
        self.wait_for_gpu(device, to, policy)?;
        to.host.copy_from(&from.host);
        Ok(())
    }
}

impl<D: TransferDevice> SlotSync<D> for MapBased {
    fn kind(&self) -> SyncKind {
        SyncKind::MapBased
    }

    fn submitted(&self, _device: &mut D, _slot: &mut Slot<D>) {}

    fn acquire_host(&self, device: &mut D, slot: &mut Slot<D>, access: MapAccess, _policy: WaitPolicy) -> Result<()> {
        device.map(&slot.buffer, access, &slot.host)?;
        slot.mapped = Some(access);
        Ok(())
    }

    fn release_host(&self, device: &mut D, slot: &mut Slot<D>) -> Result<()> {
        match slot.mapped.take() {
            Some(access) => device.unmap(&slot.buffer, access, &slot.host),
            None => Ok(()),
        }
    }

    fn wait_for_gpu(&self, _device: &mut D, _slot: &mut Slot<D>, _policy: WaitPolicy) -> Result<()> {
        Ok(())
    }

    fn copy_slot(
        &self,
        device: &mut D,
        from: &mut Slot<D>,
        to: &mut Slot<D>,
        layout: &FrameLayout,
        _policy: WaitPolicy,
    ) -> Result<()> {
        if self.buffer_copy {
            return device.copy_buffer(&from.buffer, &to.buffer, layout.size());
        }

        device.map(&from.buffer, MapAccess::Read, &from.host)?;
        let written = device.write_buffer(&to.buffer, &from.host.lock());
        device.unmap(&from.buffer, MapAccess::Read, &from.host)?;
        written
    }
}

/// Blocks until the handler holding `slot` has released it, then ends host access.
///
/// Returns whether the call had to block. A handler that holds the slot past
/// `policy.stall_warning` is logged on every interval; the wait continues,
/// because reusing memory the handler still owns is never safe.
pub(crate) fn wait_for_processing_complete<D: TransferDevice>(
    sync: &dyn SlotSync<D>,
    device: &mut D,
    slot: &mut Slot<D>,
    index: usize,
    policy: WaitPolicy,
) -> Result<bool> {
    let mut stalled = false;

    if let Some(latch) = slot.latch.take() {
        if !latch.is_released() {
            stalled = true;
            let started = Instant::now();
            while !latch.wait_for(policy.stall_warning) {
                log::warn!(
                    "slot {index}: handler has held its frame for {:?}",
                    started.elapsed()
                );
            }
        }
    }

    sync.release_host(device, slot)?;
    Ok(stalled)
}

/// Non-blocking variant: reclaims `slot` only if its handler is already done.
pub(crate) fn try_reclaim<D: TransferDevice>(sync: &dyn SlotSync<D>, device: &mut D, slot: &mut Slot<D>) -> Result<bool> {
    match &slot.latch {
        Some(latch) if !latch.is_released() => Ok(false),
        _ => {
            slot.latch = None;
            sync.release_host(device, slot)?;
            Ok(true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::device::{SoftwareDevice, TransferDirection};
    use crate::format::Extent;
    use crate::stream::handler::ReleaseSignal;

    fn policy() -> WaitPolicy {
        WaitPolicy::from(&StreamConfig::default())
    }

    fn slot(device: &mut SoftwareDevice, layout: &FrameLayout, pinned: bool) -> Slot<SoftwareDevice> {
        let host = Arc::new(if pinned {
            HostMemory::pinned(layout.len())
        } else {
            HostMemory::staging(layout.len())
        });
        let buffer = device
            .create_buffer(layout, TransferDirection::Readback, pinned.then_some(&host))
            .unwrap();
        Slot::new(buffer, host)
    }

    #[test]
    fn selection_follows_capabilities() {
        let caps = SoftwareDevice::new().capabilities();
        assert_eq!(select::<SoftwareDevice>(&caps, true).kind(), SyncKind::FenceBased);
        assert_eq!(select::<SoftwareDevice>(&caps, false).kind(), SyncKind::MapBased);

        let unpinned = DeviceCapabilities {
            pinned_memory: false,
            ..caps
        };
        assert_eq!(select::<SoftwareDevice>(&unpinned, true).kind(), SyncKind::MapBased);
    }

    #[test]
    fn fence_is_consumed_by_wait() {
        let mut device = SoftwareDevice::new();
        let layout = FrameLayout::new(Extent::new(2, 2), 256).unwrap();
        let mut slot = slot(&mut device, &layout, true);

        FenceBased.submitted(&mut device, &mut slot);
        assert!(slot.fence.is_some());
        SlotSync::<SoftwareDevice>::wait_for_gpu(&FenceBased, &mut device, &mut slot, policy()).unwrap();
        assert!(slot.fence.is_none());
        assert_eq!(device.counters().fence_waits, 1);
    }

    #[test]
    fn deferred_unmap_happens_on_reclaim() {
        let mut device = SoftwareDevice::new();
        let layout = FrameLayout::new(Extent::new(2, 2), 256).unwrap();
        let mut slot = slot(&mut device, &layout, false);
        let sync = MapBased::default();

        sync.acquire_host(&mut device, &mut slot, MapAccess::Read, policy()).unwrap();
        let latch = Latch::new();
        slot.latch = Some(Arc::clone(&latch));
        ReleaseSignal::new(latch).release();

        let stalled = wait_for_processing_complete::<SoftwareDevice>(&sync, &mut device, &mut slot, 0, policy()).unwrap();
        assert!(!stalled);
        assert!(!slot.is_busy());
        assert!(slot.mapped.is_none());
        assert_eq!(device.counters().unmaps, 1);
    }

    #[test]
    fn try_reclaim_leaves_held_slot_alone() {
        let mut device = SoftwareDevice::new();
        let layout = FrameLayout::new(Extent::new(2, 2), 256).unwrap();
        let mut slot = slot(&mut device, &layout, false);
        let sync = MapBased::default();

        sync.acquire_host(&mut device, &mut slot, MapAccess::Write, policy()).unwrap();
        let latch = Latch::new();
        slot.latch = Some(Arc::clone(&latch));
        let mut signal = ReleaseSignal::new(latch);

        assert!(!try_reclaim::<SoftwareDevice>(&sync, &mut device, &mut slot).unwrap());
        assert!(slot.is_busy());
        assert_eq!(slot.mapped, Some(MapAccess::Write));

        signal.release();
        assert!(try_reclaim::<SoftwareDevice>(&sync, &mut device, &mut slot).unwrap());
        assert!(!slot.is_busy());
        assert!(slot.mapped.is_none());
    }

    #[test]
    fn map_based_copy_without_gpu_copy_goes_through_host() {
        let caps = DeviceCapabilities {
            pinned_memory: false,
            buffer_copy: false,
            ..SoftwareDevice::new().capabilities()
        };
        let mut device = SoftwareDevice::with_capabilities(caps);
        let layout = FrameLayout::new(Extent::new(2, 2), 256).unwrap();
        let mut from = slot(&mut device, &layout, false);
        let mut to = slot(&mut device, &layout, false);
        device.write_buffer(&from.buffer, &[9; 16]).unwrap();

        let sync = MapBased { buffer_copy: false };
        sync.copy_slot(&mut device, &mut from, &mut to, &layout, policy()).unwrap();

        assert_eq!(&to.buffer.contents()[..16], &[9; 16]);
        assert!(!from.buffer.is_mapped());
        assert_eq!(device.counters().buffer_copies, 0);
    }
}
