//! CPU backend.
//!
//! Every command executes immediately on the calling thread, so fences are
//! always signalled by the time they are waited on. The backend keeps call
//! counters and rejects operations that would let the "GPU" and the host touch
//! a mapped buffer at the same time, which makes it the reference backend for
//! exercising the stream protocol headless.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{Result, StreamError};
use crate::format::{BYTES_PER_PIXEL, Bgra8, Extent, FrameLayout};

use super::{DeviceCapabilities, HostMemory, MapAccess, TransferDevice, TransferDirection};

/// Number of calls per operation, plus live buffer accounting.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct SoftwareCounters {
    pub read_pixels: u64,
    pub resolves: u64,
    pub maps: u64,
    pub unmaps: u64,
    pub fences: u64,
    pub fence_waits: u64,
    pub buffer_copies: u64,
    pub buffer_writes: u64,
    pub surfaces_created: u64,
    pub texture_allocations: u64,
    pub texture_uploads: u64,
    pub buffers_created: u64,
    pub buffers_alive: u64,
}

impl SoftwareCounters {
    /// Commands that would reach a GPU queue.
    pub fn gpu_commands(&self) -> u64 {
        self.read_pixels
            + self.resolves
            + self.maps
            + self.unmaps
            + self.fences
            + self.buffer_copies
            + self.buffer_writes
            + self.surfaces_created
            + self.texture_allocations
            + self.texture_uploads
            + self.buffers_created
    }
}

#[derive(Debug, Default)]
struct Shared {
    counters: Mutex<SoftwareCounters>,
    stall_fences: AtomicBool,
    next_fence: AtomicU64,
}

impl Shared {
    fn count(&self, f: impl FnOnce(&mut SoftwareCounters)) {
        f(&mut self.counters.lock());
    }
}

/// CPU implementation of [`TransferDevice`].
///
/// Clones share counters and fault switches.
#[derive(Debug, Clone)]
pub struct SoftwareDevice {
    caps: DeviceCapabilities,
    shared: Arc<Shared>,
}

#[derive(Debug)]
enum Storage {
    Pinned(Arc<HostMemory>),
    Device(Mutex<Vec<u8>>),
}

/// Transfer buffer backed by host memory.
#[derive(Debug)]
pub struct SoftwareBuffer {
    storage: Storage,
    mapped: Mutex<Option<MapAccess>>,
    shared: Arc<Shared>,
}

/// Completion token; commands are already complete when it is created.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SoftwareFence(u64);

/// Tightly packed BGRA8 surface.
#[derive(Debug)]
pub struct SoftwareSurface {
    extent: Extent,
    samples: u32,
    depth: bool,
    pixels: Mutex<Vec<u8>>,
}

/// Tightly packed BGRA8 texture.
#[derive(Debug)]
pub struct SoftwareTexture {
    extent: Extent,
    pixels: Mutex<Vec<u8>>,
}

impl Default for SoftwareDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareDevice {
    /// Device with every optional capability enabled.
    pub fn new() -> Self {
        Self::with_capabilities(DeviceCapabilities {
            pinned_memory: true,
            buffer_copy: true,
            multisample: true,
            sample_counts: 1 | 2 | 4 | 8,
            max_dimension: 16384,
            row_alignment: 256,
        })
    }

    /// Device reporting `caps`; used to force a particular transfer path.
    pub fn with_capabilities(caps: DeviceCapabilities) -> Self {
        Self {
            caps,
            shared: Arc::new(Shared::default()),
        }
    }

    /// Snapshot of the call counters.
    pub fn counters(&self) -> SoftwareCounters {
        self.shared.counters.lock().clone()
    }

    /// Makes every subsequent fence wait time out (or recover when `false`).
    pub fn stall_fences(&self, stall: bool) {
        self.shared.stall_fences.store(stall, Ordering::SeqCst);
    }

    fn ensure_unmapped(buffer: &SoftwareBuffer, op: &str) -> Result<()> {
        match *buffer.mapped.lock() {
            Some(access) => Err(StreamError::device(format!(
                "{op} on a buffer mapped for {access:?}"
            ))),
            None => Ok(()),
        }
    }
}

impl SoftwareBuffer {
    fn with_bytes<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        match &self.storage {
            Storage::Pinned(memory) => f(&mut memory.lock()),
            Storage::Device(bytes) => f(&mut bytes.lock()),
        }
    }

    fn aliases(&self, host: &HostMemory) -> bool {
        matches!(&self.storage, Storage::Pinned(memory) if std::ptr::eq(Arc::as_ptr(memory), host))
    }

    /// Whether the buffer is currently mapped.
    pub fn is_mapped(&self) -> bool {
        self.mapped.lock().is_some()
    }

    /// Copy of the buffer contents.
    pub fn contents(&self) -> Vec<u8> {
        self.with_bytes(|bytes| bytes.to_vec())
    }
}

impl Drop for SoftwareBuffer {
    fn drop(&mut self) {
        self.shared.count(|c| c.buffers_alive -= 1);
    }
}

impl SoftwareSurface {
    pub fn extent(&self) -> Extent {
        self.extent
    }

    pub fn sample_count(&self) -> u32 {
        self.samples
    }

    pub fn has_depth(&self) -> bool {
        self.depth
    }

    /// Clears every pixel to `pixel`.
    pub fn fill(&self, pixel: Bgra8) {
        let mut bytes = self.pixels.lock();
        for chunk in bytes.chunks_exact_mut(BYTES_PER_PIXEL as usize) {
            chunk.copy_from_slice(&pixel.to_bytes());
        }
    }

    pub fn set_pixel(&self, x: u32, y: u32, pixel: Bgra8) {
        let at = self.offset(x, y);
        self.pixels.lock()[at..at + 4].copy_from_slice(&pixel.to_bytes());
    }

    pub fn pixel(&self, x: u32, y: u32) -> Bgra8 {
        let at = self.offset(x, y);
        *bytemuck::from_bytes(&self.pixels.lock()[at..at + 4])
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        ((y * self.extent.width + x) * BYTES_PER_PIXEL) as usize
    }
}

impl SoftwareTexture {
    pub fn extent(&self) -> Extent {
        self.extent
    }

    pub fn pixel(&self, x: u32, y: u32) -> Bgra8 {
        let at = ((y * self.extent.width + x) * BYTES_PER_PIXEL) as usize;
        *bytemuck::from_bytes(&self.pixels.lock()[at..at + 4])
    }
}

impl TransferDevice for SoftwareDevice {
    type Buffer = SoftwareBuffer;
    type Fence = SoftwareFence;
    type Surface = SoftwareSurface;
    type Texture = SoftwareTexture;

    fn capabilities(&self) -> DeviceCapabilities {
        self.caps
    }

    fn create_surface(&mut self, extent: Extent, samples: u32, depth: bool) -> Result<SoftwareSurface> {
        if !self.caps.supports_samples(samples) {
            return Err(StreamError::UnsupportedCapability("multisampled surfaces"));
        }
        self.shared.count(|c| c.surfaces_created += 1);

        let len = (extent.width * extent.height * BYTES_PER_PIXEL) as usize;
        Ok(SoftwareSurface {
            extent,
            samples,
            depth,
            pixels: Mutex::new(vec![0; len]),
        })
    }

    fn resolve(&mut self, src: &SoftwareSurface, dst: &SoftwareSurface) -> Result<()> {
        if src.extent != dst.extent || dst.samples != 1 {
            return Err(StreamError::device("resolve requires a single-sample surface of equal size"));
        }
        self.shared.count(|c| c.resolves += 1);
        dst.pixels.lock().copy_from_slice(&src.pixels.lock());
        Ok(())
    }

    fn create_buffer(
        &mut self,
        layout: &FrameLayout,
        _direction: TransferDirection,
        pinned: Option<&Arc<HostMemory>>,
    ) -> Result<SoftwareBuffer> {
        let storage = match pinned {
            Some(_) if !self.caps.pinned_memory => {
                return Err(StreamError::UnsupportedCapability("pinned host memory"));
            }
            Some(memory) if memory.len() < layout.len() => {
                return Err(StreamError::device("pinned allocation smaller than the frame"));
            }
            Some(memory) => Storage::Pinned(Arc::clone(memory)),
            None => Storage::Device(Mutex::new(vec![0; layout.len()])),
        };

        self.shared.count(|c| {
            c.buffers_created += 1;
            c.buffers_alive += 1;
        });
        Ok(SoftwareBuffer {
            storage,
            mapped: Mutex::new(None),
            shared: Arc::clone(&self.shared),
        })
    }

    fn read_pixels(&mut self, src: &SoftwareSurface, dst: &SoftwareBuffer, layout: &FrameLayout) -> Result<()> {
        Self::ensure_unmapped(dst, "read pixels")?;
        if src.samples != 1 {
            return Err(StreamError::device("read pixels from a multisampled surface"));
        }
        self.shared.count(|c| c.read_pixels += 1);

        let pixels = src.pixels.lock();
        let row = layout.row_bytes();
        dst.with_bytes(|bytes| {
            for y in 0..layout.height() as usize {
                let from = y * row;
                let to = y * layout.stride as usize;
                bytes[to..to + row].copy_from_slice(&pixels[from..from + row]);
            }
        });
        Ok(())
    }

    fn copy_buffer(&mut self, src: &SoftwareBuffer, dst: &SoftwareBuffer, len: u64) -> Result<()> {
        if !self.caps.buffer_copy {
            return Err(StreamError::UnsupportedCapability("buffer to buffer copy"));
        }
        Self::ensure_unmapped(src, "copy from")?;
        Self::ensure_unmapped(dst, "copy into")?;
        self.shared.count(|c| c.buffer_copies += 1);

        let data = src.contents();
        let n = len as usize;
        dst.with_bytes(|bytes| bytes[..n].copy_from_slice(&data[..n]));
        Ok(())
    }

    fn write_buffer(&mut self, dst: &SoftwareBuffer, data: &[u8]) -> Result<()> {
        Self::ensure_unmapped(dst, "write")?;
        self.shared.count(|c| c.buffer_writes += 1);
        dst.with_bytes(|bytes| {
            let n = bytes.len().min(data.len());
            bytes[..n].copy_from_slice(&data[..n]);
        });
        Ok(())
    }

    fn insert_fence(&mut self) -> SoftwareFence {
        self.shared.count(|c| c.fences += 1);
        SoftwareFence(self.shared.next_fence.fetch_add(1, Ordering::SeqCst))
    }

    fn wait_fence(&mut self, _fence: SoftwareFence, timeout: Duration) -> Result<()> {
        self.shared.count(|c| c.fence_waits += 1);
        if self.shared.stall_fences.load(Ordering::SeqCst) {
            return Err(StreamError::SynchronizationTimeout {
                what: "GPU fence",
                waited: timeout,
            });
        }
        Ok(())
    }

    fn map(&mut self, buffer: &SoftwareBuffer, access: MapAccess, host: &HostMemory) -> Result<()> {
        let mut mapped = buffer.mapped.lock();
        if let Some(current) = *mapped {
            return Err(StreamError::device(format!("buffer already mapped for {current:?}")));
        }
        self.shared.count(|c| c.maps += 1);

        if access == MapAccess::Read && !buffer.aliases(host) {
            buffer.with_bytes(|bytes| {
                let mut dst = host.lock();
                let n = dst.len().min(bytes.len());
                dst[..n].copy_from_slice(&bytes[..n]);
            });
        }
        *mapped = Some(access);
        Ok(())
    }

    fn unmap(&mut self, buffer: &SoftwareBuffer, access: MapAccess, host: &HostMemory) -> Result<()> {
        let mut mapped = buffer.mapped.lock();
        if *mapped != Some(access) {
            return Err(StreamError::device(format!("unmap for {access:?} on a buffer mapped as {:?}", *mapped)));
        }
        self.shared.count(|c| c.unmaps += 1);

        if access == MapAccess::Write && !buffer.aliases(host) {
            let src = host.lock();
            buffer.with_bytes(|bytes| {
                let n = bytes.len().min(src.len());
                bytes[..n].copy_from_slice(&src[..n]);
            });
        }
        *mapped = None;
        Ok(())
    }

    fn create_texture(&mut self, extent: Extent) -> Result<SoftwareTexture> {
        self.shared.count(|c| c.texture_allocations += 1);
        let len = (extent.width * extent.height * BYTES_PER_PIXEL) as usize;
        Ok(SoftwareTexture {
            extent,
            pixels: Mutex::new(vec![0; len]),
        })
    }

    fn upload_texture(&mut self, src: &SoftwareBuffer, dst: &SoftwareTexture, layout: &FrameLayout) -> Result<()> {
        Self::ensure_unmapped(src, "texture upload")?;
        if dst.extent != layout.extent {
            return Err(StreamError::device("texture upload with mismatched extent"));
        }
        self.shared.count(|c| c.texture_uploads += 1);

        let row = layout.row_bytes();
        let mut pixels = dst.pixels.lock();
        src.with_bytes(|bytes| {
            for y in 0..layout.height() as usize {
                let from = y * layout.stride as usize;
                let to = y * row;
                pixels[to..to + row].copy_from_slice(&bytes[from..from + row]);
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(w: u32, h: u32) -> FrameLayout {
        FrameLayout::new(Extent::new(w, h), 256).unwrap()
    }

    #[test]
    fn read_pixels_respects_stride() {
        let mut device = SoftwareDevice::new();
        let layout = layout(3, 2);
        let surface = device.create_surface(layout.extent, 1, false).unwrap();
        surface.fill(Bgra8::new(10, 20, 30, 255));

        let buffer = device.create_buffer(&layout, TransferDirection::Readback, None).unwrap();
        device.read_pixels(&surface, &buffer, &layout).unwrap();

        let bytes = buffer.contents();
        assert_eq!(&bytes[0..4], &[30, 20, 10, 255]);
        assert_eq!(&bytes[256..260], &[30, 20, 10, 255]);
        assert_eq!(&bytes[12..16], &[0, 0, 0, 0]);
    }

    #[test]
    fn mapped_buffer_rejects_gpu_writes() {
        let mut device = SoftwareDevice::new();
        let layout = layout(4, 4);
        let surface = device.create_surface(layout.extent, 1, false).unwrap();
        let buffer = device.create_buffer(&layout, TransferDirection::Readback, None).unwrap();
        let host = HostMemory::staging(layout.len());

        device.map(&buffer, MapAccess::Read, &host).unwrap();
        assert!(device.read_pixels(&surface, &buffer, &layout).is_err());
        assert!(device.map(&buffer, MapAccess::Read, &host).is_err());

        device.unmap(&buffer, MapAccess::Read, &host).unwrap();
        assert!(device.read_pixels(&surface, &buffer, &layout).is_ok());
    }

    #[test]
    fn pinned_buffer_aliases_host_memory() {
        let mut device = SoftwareDevice::new();
        let layout = layout(2, 2);
        let host = Arc::new(HostMemory::pinned(layout.len()));
        let surface = device.create_surface(layout.extent, 1, false).unwrap();
        surface.fill(Bgra8::new(1, 2, 3, 4));

        let buffer = device
            .create_buffer(&layout, TransferDirection::Readback, Some(&host))
            .unwrap();
        device.read_pixels(&surface, &buffer, &layout).unwrap();

        assert_eq!(layout.row(&host.lock(), 1)[1], Bgra8::new(1, 2, 3, 4));
    }

    #[test]
    fn surfaces_reject_unsupported_sample_counts() {
        let mut device = SoftwareDevice::new();
        let extent = Extent::new(2, 2);
        for samples in [3, 6, 16] {
            let err = device.create_surface(extent, samples, true).unwrap_err();
            assert!(matches!(err, StreamError::UnsupportedCapability(_)), "{samples}");
        }
        assert_eq!(device.create_surface(extent, 4, true).unwrap().sample_count(), 4);
        assert_eq!(device.counters().surfaces_created, 1);
    }

    #[test]
    fn pinned_buffer_requires_capability() {
        let mut device = SoftwareDevice::with_capabilities(DeviceCapabilities {
            pinned_memory: false,
            ..SoftwareDevice::new().capabilities()
        });
        let layout = layout(2, 2);
        let host = Arc::new(HostMemory::pinned(layout.len()));
        let err = device
            .create_buffer(&layout, TransferDirection::Upload, Some(&host))
            .unwrap_err();
        assert!(matches!(err, StreamError::UnsupportedCapability(_)));
    }

    #[test]
    fn write_mapping_publishes_on_unmap() {
        let mut device = SoftwareDevice::new();
        let layout = layout(2, 1);
        let buffer = device.create_buffer(&layout, TransferDirection::Upload, None).unwrap();
        let host = HostMemory::staging(layout.len());

        device.map(&buffer, MapAccess::Write, &host).unwrap();
        layout.fill(&mut host.lock(), Bgra8::new(5, 6, 7, 8));
        assert_eq!(buffer.contents()[0], 0);

        device.unmap(&buffer, MapAccess::Write, &host).unwrap();
        assert_eq!(&buffer.contents()[0..4], &[7, 6, 5, 8]);
    }

    #[test]
    fn stalled_fences_time_out() {
        let mut device = SoftwareDevice::new();
        device.stall_fences(true);
        let fence = device.insert_fence();
        let err = device.wait_fence(fence, Duration::from_millis(1)).unwrap_err();
        assert!(matches!(err, StreamError::SynchronizationTimeout { .. }));
    }

    #[test]
    fn dropped_buffers_are_accounted() {
        let mut device = SoftwareDevice::new();
        let layout = layout(1, 1);
        let a = device.create_buffer(&layout, TransferDirection::Upload, None).unwrap();
        let b = device.create_buffer(&layout, TransferDirection::Upload, None).unwrap();
        assert_eq!(device.counters().buffers_alive, 2);
        drop(a);
        drop(b);
        assert_eq!(device.counters().buffers_alive, 0);
        assert_eq!(device.counters().buffers_created, 2);
    }
}
