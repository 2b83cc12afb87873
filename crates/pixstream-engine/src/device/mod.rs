//! Device seam for the two transfer paths.
//!
//! This module is responsible for:
//! - describing what a backend can do (`DeviceCapabilities`)
//! - the narrow set of GPU operations the streams issue (`TransferDevice`)
//! - the wgpu backend (headless `Gpu` context + `WgpuDevice`)
//! - a CPU backend executing commands immediately (`SoftwareDevice`)

mod gpu;
mod host;
mod init;
pub mod software;
mod wgpu_transfer;

use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::format::{Extent, FrameLayout};

pub use gpu::Gpu;
pub use host::{HostMemory, MIN_PAGE_SIZE, page_size};
pub use init::GpuInit;
pub use software::SoftwareDevice;
pub use wgpu_transfer::{WgpuBuffer, WgpuDevice, WgpuSurface, WgpuTexture};

/// Features a backend reports once; streams pick their strategy from them.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct DeviceCapabilities {
    /// Host allocations can back transfer buffers directly and fences exist.
    pub pinned_memory: bool,
    /// Transfer buffers can be copied into each other on the GPU.
    pub buffer_copy: bool,
    /// Multisampled render targets and resolves are available.
    pub multisample: bool,
    /// Supported sample counts as a mask: count `n` is usable when bit `n` is set.
    /// Only powers of two qualify; `1` is always implied.
    pub sample_counts: u32,
    /// Largest width or height of a surface or texture.
    pub max_dimension: u32,
    /// Row stride alignment required for buffer/texture copies, in bytes.
    pub row_alignment: u32,
}

impl DeviceCapabilities {
    /// Whether surfaces with `samples` samples can be created.
    pub fn supports_samples(&self, samples: u32) -> bool {
        match samples {
            1 => true,
            n if !n.is_power_of_two() => false,
            n => self.multisample && self.sample_counts & n != 0,
        }
    }

    /// Largest supported sample count not above `requested`, at least 1.
    pub fn samples_at_most(&self, requested: u32) -> u32 {
        let mut n = if requested == 0 { 1 } else { 1 << requested.ilog2() };
        while n > 1 && !self.supports_samples(n) {
            n >>= 1;
        }
        n
    }
}

/// Which way pixels flow through a transfer buffer.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TransferDirection {
    /// Render target to host memory.
    Readback,
    /// Host memory to texture.
    Upload,
}

/// How the host side accesses a mapped slot.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum MapAccess {
    Read,
    Write,
}

impl TransferDirection {
    #[inline]
    pub fn host_access(self) -> MapAccess {
        match self {
            Self::Readback => MapAccess::Read,
            Self::Upload => MapAccess::Write,
        }
    }
}

/// GPU operations needed by the read-back and upload streams.
///
/// All calls come from the render thread. A backend must execute commands in
/// submission order; completion is observed only through fences or mapping.
pub trait TransferDevice {
    /// GPU-visible transfer buffer, one per slot.
    type Buffer;
    /// GPU completion token.
    type Fence;
    /// Render target or resolve surface.
    type Surface;
    /// Sampled texture written by the upload stream.
    type Texture;

    fn capabilities(&self) -> DeviceCapabilities;

    /// Creates a BGRA8 surface; `depth` adds a depth/stencil attachment with the same sample count.
    fn create_surface(&mut self, extent: Extent, samples: u32, depth: bool) -> Result<Self::Surface>;

    /// Resolves the multisampled `src` into the single-sample `dst`.
    fn resolve(&mut self, src: &Self::Surface, dst: &Self::Surface) -> Result<()>;

    /// Creates a transfer buffer of `layout.size()` bytes.
    ///
    /// With `pinned`, the buffer aliases the given host memory. Only valid when
    /// `capabilities().pinned_memory` is set.
    fn create_buffer(
        &mut self,
        layout: &FrameLayout,
        direction: TransferDirection,
        pinned: Option<&Arc<HostMemory>>,
    ) -> Result<Self::Buffer>;

    /// Queues a copy of `src` into `dst`, rows spaced by `layout.stride`.
    fn read_pixels(&mut self, src: &Self::Surface, dst: &Self::Buffer, layout: &FrameLayout) -> Result<()>;

    /// Queues a GPU copy of the first `len` bytes of `src` into `dst`.
    fn copy_buffer(&mut self, src: &Self::Buffer, dst: &Self::Buffer, len: u64) -> Result<()>;

    /// Queues a write of host `bytes` into `dst`.
    fn write_buffer(&mut self, dst: &Self::Buffer, bytes: &[u8]) -> Result<()>;

    /// Returns a token signalled once every command queued so far has completed.
    fn insert_fence(&mut self) -> Self::Fence;

    /// Blocks until `fence` signals or `timeout` elapses.
    fn wait_fence(&mut self, fence: Self::Fence, timeout: Duration) -> Result<()>;

    /// Maps `buffer`, blocking until prior GPU access has finished.
    ///
    /// For [`MapAccess::Read`] the buffer contents become visible in `host`.
    fn map(&mut self, buffer: &Self::Buffer, access: MapAccess, host: &HostMemory) -> Result<()>;

    /// Unmaps `buffer`. For [`MapAccess::Write`] the contents of `host` are
    /// written to the buffer first.
    fn unmap(&mut self, buffer: &Self::Buffer, access: MapAccess, host: &HostMemory) -> Result<()>;

    /// Allocates a sampled texture.
    fn create_texture(&mut self, extent: Extent) -> Result<Self::Texture>;

    /// Queues an update of the whole `dst` from `src`.
    fn upload_texture(&mut self, src: &Self::Buffer, dst: &Self::Texture, layout: &FrameLayout) -> Result<()>;
}
