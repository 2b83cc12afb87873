use anyhow::Result;
use pixstream_engine::device::{SoftwareDevice, TransferDevice, WgpuDevice, WgpuSurface};
use pixstream_engine::format::Bgra8;

/// Draws the demo scene into a read-back render target.
///
/// The scene is a clear colour cycling through the hue wheel.
pub trait Scene: TransferDevice {
    fn clear(&self, target: &Self::Surface, color: Bgra8) -> Result<()>;
}

impl Scene for SoftwareDevice {
    fn clear(&self, target: &Self::Surface, color: Bgra8) -> Result<()> {
        target.fill(color);
        Ok(())
    }
}

impl Scene for WgpuDevice {
    fn clear(&self, target: &WgpuSurface, color: Bgra8) -> Result<()> {
        let channel = |c: u8| f64::from(c) / 255.0;
        let mut encoder = self
            .device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("demo scene"),
            });
        {
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("demo clear pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: target.color_view(),
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: channel(color.r),
                            g: channel(color.g),
                            b: channel(color.b),
                            a: channel(color.a),
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: target.depth_view().map(|view| {
                    wgpu::RenderPassDepthStencilAttachment {
                        view,
                        depth_ops: Some(wgpu::Operations {
                            load: wgpu::LoadOp::Clear(1.0),
                            store: wgpu::StoreOp::Store,
                        }),
                        stencil_ops: Some(wgpu::Operations {
                            load: wgpu::LoadOp::Clear(0),
                            store: wgpu::StoreOp::Store,
                        }),
                    }
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });
        }
        self.queue().submit(std::iter::once(encoder.finish()));
        Ok(())
    }
}

/// Scene colour for frame `n`: a full hue cycle every 360 frames.
pub fn color_at(n: u64) -> Bgra8 {
    let hue = (n % 360) as f32;
    let x = 1.0 - ((hue / 60.0) % 2.0 - 1.0).abs();
    let (r, g, b) = match (hue / 60.0) as u32 {
        0 => (1.0, x, 0.0),
        1 => (x, 1.0, 0.0),
        2 => (0.0, 1.0, x),
        3 => (0.0, x, 1.0),
        4 => (x, 0.0, 1.0),
        _ => (1.0, 0.0, x),
    };
    let byte = |v: f32| (v * 255.0).round() as u8;
    Bgra8::new(byte(r), byte(g), byte(b), 255)
}
