use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;

use crate::error::{Result, StreamError};
use crate::format::{Extent, FrameLayout};

use super::{DeviceCapabilities, Gpu, HostMemory, MapAccess, TransferDevice, TransferDirection};

const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Bgra8Unorm;
const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth24PlusStencil8;

/// wgpu implementation of the transfer operations.
///
/// wgpu exposes no persistent host mappings, so this backend always selects
/// the mapped path. Fences are queue submission indices.
#[derive(Clone)]
pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    caps: DeviceCapabilities,
    map_timeout: Duration,
}

/// Transfer buffer for one ring slot.
#[derive(Debug)]
pub struct WgpuBuffer {
    buffer: wgpu::Buffer,
}

/// Render target (optionally multisampled, optionally with depth) or resolve surface.
#[derive(Debug)]
pub struct WgpuSurface {
    extent: Extent,
    samples: u32,
    color: wgpu::Texture,
    color_view: wgpu::TextureView,
    depth: Option<(wgpu::Texture, wgpu::TextureView)>,
}

/// Sampled texture written by the upload stream.
#[derive(Debug)]
pub struct WgpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

impl WgpuDevice {
    /// Wraps the device/queue of `gpu` and queries its capabilities.
    pub fn new(gpu: &Gpu) -> Self {
        let adapter = gpu.adapter();
        let device = gpu.device();

        let color = adapter.get_texture_format_features(COLOR_FORMAT).flags;
        let depth = adapter.get_texture_format_features(DEPTH_FORMAT).flags;
        let sample_counts = [2, 4, 8, 16]
            .into_iter()
            .filter(|&n| color.sample_count_supported(n) && depth.sample_count_supported(n))
            .fold(1, |mask, n| mask | n);

        let caps = DeviceCapabilities {
            pinned_memory: false,
            buffer_copy: device
                .features()
                .contains(wgpu::Features::MAPPABLE_PRIMARY_BUFFERS),
            multisample: sample_counts > 1,
            sample_counts,
            max_dimension: device.limits().max_texture_dimension_2d,
            row_alignment: wgpu::COPY_BYTES_PER_ROW_ALIGNMENT,
        };
        log::debug!("wgpu transfer capabilities: {caps:?}");

        Self {
            device: device.clone(),
            queue: gpu.queue().clone(),
            caps,
            map_timeout: gpu.init().map_timeout,
        }
    }

    /// Returns a reference to the logical device.
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// Returns a reference to the command queue.
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    fn encoder(&self, label: &'static str) -> wgpu::CommandEncoder {
        self.device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) })
    }

    fn submit(&self, encoder: wgpu::CommandEncoder) -> wgpu::SubmissionIndex {
        self.queue.submit(std::iter::once(encoder.finish()))
    }

    fn poll_wait(
        &self,
        submission_index: Option<wgpu::SubmissionIndex>,
        timeout: Duration,
        what: &'static str,
    ) -> Result<()> {
        match self.device.poll(wgpu::PollType::Wait {
            submission_index,
            timeout: Some(timeout),
        }) {
            Ok(_) => Ok(()),
            Err(wgpu::PollError::Timeout) => Err(StreamError::SynchronizationTimeout {
                what,
                waited: timeout,
            }),
            Err(err) => Err(StreamError::device(err.to_string())),
        }
    }

    fn texture_size(extent: Extent) -> wgpu::Extent3d {
        wgpu::Extent3d {
            width: extent.width,
            height: extent.height,
            depth_or_array_layers: 1,
        }
    }

    fn buffer_layout(layout: &FrameLayout) -> wgpu::TexelCopyBufferLayout {
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(layout.stride),
            rows_per_image: Some(layout.height()),
        }
    }
}

impl WgpuSurface {
    /// View to render the scene into.
    pub fn color_view(&self) -> &wgpu::TextureView {
        &self.color_view
    }

    /// Depth/stencil view, present on render targets.
    pub fn depth_view(&self) -> Option<&wgpu::TextureView> {
        self.depth.as_ref().map(|(_, view)| view)
    }

    pub fn color_texture(&self) -> &wgpu::Texture {
        &self.color
    }

    pub fn extent(&self) -> Extent {
        self.extent
    }

    pub fn sample_count(&self) -> u32 {
        self.samples
    }
}

impl WgpuTexture {
    /// View to sample from.
    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }
}

impl TransferDevice for WgpuDevice {
    type Buffer = WgpuBuffer;
    type Fence = wgpu::SubmissionIndex;
    type Surface = WgpuSurface;
    type Texture = WgpuTexture;

    fn capabilities(&self) -> DeviceCapabilities {
        self.caps
    }

    fn create_surface(&mut self, extent: Extent, samples: u32, depth: bool) -> Result<WgpuSurface> {
        let size = Self::texture_size(extent);

        // Multisampled textures cannot be copy sources; they are resolved first.
        let mut usage = wgpu::TextureUsages::RENDER_ATTACHMENT;
        if samples == 1 {
            usage |= wgpu::TextureUsages::COPY_SRC;
        }

        let color = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("pixstream color target"),
            size,
            mip_level_count: 1,
            sample_count: samples,
            dimension: wgpu::TextureDimension::D2,
            format: COLOR_FORMAT,
            usage,
            view_formats: &[],
        });
        let color_view = color.create_view(&wgpu::TextureViewDescriptor::default());

        let depth = depth.then(|| {
            let texture = self.device.create_texture(&wgpu::TextureDescriptor {
                label: Some("pixstream depth target"),
                size,
                mip_level_count: 1,
                sample_count: samples,
                dimension: wgpu::TextureDimension::D2,
                format: DEPTH_FORMAT,
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
                view_formats: &[],
            });
            let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
            (texture, view)
        });

        Ok(WgpuSurface {
            extent,
            samples,
            color,
            color_view,
            depth,
        })
    }

    fn resolve(&mut self, src: &WgpuSurface, dst: &WgpuSurface) -> Result<()> {
        let mut encoder = self.encoder("pixstream msaa resolve");
        {
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("pixstream msaa resolve pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &src.color_view,
                    resolve_target: Some(&dst.color_view),
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });
        }
        self.submit(encoder);
        Ok(())
    }

    fn create_buffer(
        &mut self,
        layout: &FrameLayout,
        direction: TransferDirection,
        pinned: Option<&Arc<HostMemory>>,
    ) -> Result<WgpuBuffer> {
        if pinned.is_some() {
            return Err(StreamError::UnsupportedCapability("pinned host memory"));
        }

        let usage = match direction {
            TransferDirection::Readback if self.caps.buffer_copy => {
                wgpu::BufferUsages::MAP_READ
                    | wgpu::BufferUsages::COPY_DST
                    | wgpu::BufferUsages::COPY_SRC
            }
            TransferDirection::Readback => wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            TransferDirection::Upload => wgpu::BufferUsages::MAP_WRITE | wgpu::BufferUsages::COPY_SRC,
        };

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("pixstream transfer buffer"),
            size: layout.size(),
            usage,
            mapped_at_creation: false,
        });
        Ok(WgpuBuffer { buffer })
    }

    fn read_pixels(&mut self, src: &WgpuSurface, dst: &WgpuBuffer, layout: &FrameLayout) -> Result<()> {
        let mut encoder = self.encoder("pixstream read pixels");
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &src.color,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &dst.buffer,
                layout: Self::buffer_layout(layout),
            },
            Self::texture_size(layout.extent),
        );
        self.submit(encoder);
        Ok(())
    }

    fn copy_buffer(&mut self, src: &WgpuBuffer, dst: &WgpuBuffer, len: u64) -> Result<()> {
        if !self.caps.buffer_copy {
            return Err(StreamError::UnsupportedCapability("buffer to buffer copy"));
        }
        let mut encoder = self.encoder("pixstream buffer copy");
        encoder.copy_buffer_to_buffer(&src.buffer, 0, &dst.buffer, 0, len);
        self.submit(encoder);
        Ok(())
    }

    fn write_buffer(&mut self, dst: &WgpuBuffer, bytes: &[u8]) -> Result<()> {
        self.queue.write_buffer(&dst.buffer, 0, bytes);
        // Staged writes only reach the buffer on the next submit. Flush now so
        // a following map of `dst` waits for the write instead of racing it.
        self.queue.submit(std::iter::empty());
        Ok(())
    }

    fn insert_fence(&mut self) -> wgpu::SubmissionIndex {
        self.queue.submit(std::iter::empty())
    }

    fn wait_fence(&mut self, fence: wgpu::SubmissionIndex, timeout: Duration) -> Result<()> {
        self.poll_wait(Some(fence), timeout, "GPU fence")
    }

    fn map(&mut self, buffer: &WgpuBuffer, access: MapAccess, host: &HostMemory) -> Result<()> {
        let mode = match access {
            MapAccess::Read => wgpu::MapMode::Read,
            MapAccess::Write => wgpu::MapMode::Write,
        };

        let slice = buffer.buffer.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(mode, move |result| {
            let _ = tx.send(result);
        });

        // Waits for every prior submission touching the buffer.
        self.poll_wait(None, self.map_timeout, "buffer map")?;

        match rx.recv_timeout(self.map_timeout) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(StreamError::device(format!("buffer map failed: {err}"))),
            Err(_) => {
                return Err(StreamError::SynchronizationTimeout {
                    what: "buffer map",
                    waited: self.map_timeout,
                })
            }
        }

        if access == MapAccess::Read {
            let view = slice.get_mapped_range();
            let mut bytes = host.lock();
            let n = bytes.len().min(view.len());
            bytes[..n].copy_from_slice(&view[..n]);
        }
        Ok(())
    }

    fn unmap(&mut self, buffer: &WgpuBuffer, access: MapAccess, host: &HostMemory) -> Result<()> {
        if access == MapAccess::Write {
            let mut view = buffer.buffer.slice(..).get_mapped_range_mut();
            let bytes = host.lock();
            let n = bytes.len().min(view.len());
            view[..n].copy_from_slice(&bytes[..n]);
        }
        buffer.buffer.unmap();
        Ok(())
    }

    fn create_texture(&mut self, extent: Extent) -> Result<WgpuTexture> {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("pixstream upload texture"),
            size: Self::texture_size(extent),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: COLOR_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(WgpuTexture { texture, view })
    }

    fn upload_texture(&mut self, src: &WgpuBuffer, dst: &WgpuTexture, layout: &FrameLayout) -> Result<()> {
        let mut encoder = self.encoder("pixstream texture upload");
        encoder.copy_buffer_to_texture(
            wgpu::TexelCopyBufferInfo {
                buffer: &src.buffer,
                layout: Self::buffer_layout(layout),
            },
            wgpu::TexelCopyTextureInfo {
                texture: &dst.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            Self::texture_size(layout.extent),
        );
        self.submit(encoder);
        Ok(())
    }
}
