use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, MappedMutexGuard, Mutex};

use crate::device::{HostMemory, MapAccess};
use crate::format::FrameLayout;

/// Frame source or sink attached to a stream.
///
/// `process` is called on the render thread, exactly once per frame. It should
/// return quickly; the actual work may continue on another thread as long as
/// the lease travels with it. The slot is returned to the stream when the
/// lease is released or dropped.
pub trait StreamHandler {
    /// Width the stream should allocate for, in pixels.
    fn width(&self) -> u32;

    /// Height the stream should allocate for, in pixels.
    fn height(&self) -> u32;

    /// Receives exclusive access to one slot's host memory.
    fn process(&mut self, frame: FrameLease);
}

/// One-shot completion flag shared between a stream slot and its lease.
#[derive(Debug, Default)]
pub(crate) struct Latch {
    released: Mutex<bool>,
    cond: Condvar,
}

impl Latch {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn release(&self) {
        let mut released = self.released.lock();
        *released = true;
        self.cond.notify_all();
    }

    pub(crate) fn is_released(&self) -> bool {
        *self.released.lock()
    }

    /// Waits up to `timeout`; returns whether the latch was released.
    pub(crate) fn wait_for(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut released = self.released.lock();
        while !*released {
            if self.cond.wait_until(&mut released, deadline).timed_out() {
                return *released;
            }
        }
        true
    }
}

/// Hands a slot back to its stream. Firing it more than once has no effect.
pub struct ReleaseSignal {
    latch: Option<Arc<Latch>>,
}

impl ReleaseSignal {
    pub(crate) fn new(latch: Arc<Latch>) -> Self {
        Self { latch: Some(latch) }
    }

    pub fn release(&mut self) {
        if let Some(latch) = self.latch.take() {
            latch.release();
        }
    }

    pub fn is_released(&self) -> bool {
        self.latch.is_none()
    }
}

impl Drop for ReleaseSignal {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for ReleaseSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReleaseSignal")
            .field("released", &self.is_released())
            .finish()
    }
}

/// Exclusive, time-limited access to one frame's host memory.
///
/// Bytes are laid out per [`FrameLayout`]: BGRA8, rows `stride` bytes apart.
/// Read-back leases carry a rendered frame; upload leases expect the handler
/// to write the next frame.
#[derive(Debug)]
pub struct FrameLease {
    layout: FrameLayout,
    access: MapAccess,
    index: u64,
    memory: Arc<HostMemory>,
    signal: ReleaseSignal,
}

impl FrameLease {
    pub(crate) fn new(
        layout: FrameLayout,
        access: MapAccess,
        index: u64,
        memory: Arc<HostMemory>,
        signal: ReleaseSignal,
    ) -> Self {
        Self {
            layout,
            access,
            index,
            memory,
            signal,
        }
    }

    pub fn width(&self) -> u32 {
        self.layout.width()
    }

    pub fn height(&self) -> u32 {
        self.layout.height()
    }

    /// Row stride in bytes.
    pub fn stride(&self) -> u32 {
        self.layout.stride
    }

    pub fn layout(&self) -> FrameLayout {
        self.layout
    }

    /// Position of this frame in the stream's sequence.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Whether the stream expects the handler to write (upload) or read (read-back).
    pub fn access(&self) -> MapAccess {
        self.access
    }

    /// Frame bytes.
    pub fn bytes(&self) -> MappedMutexGuard<'_, [u8]> {
        self.memory.lock()
    }

    /// Frame bytes for writing.
    pub fn bytes_mut(&mut self) -> MappedMutexGuard<'_, [u8]> {
        self.memory.lock()
    }

    /// Returns the slot to the stream.
    pub fn release(mut self) {
        self.signal.release();
    }
}
