use anyhow::{Context, Result};

use super::GpuInit;

/// Owns the wgpu core objects used by the transfer streams.
///
/// This type is the headless rendering context:
/// - creates and stores Instance/Adapter/Device/Queue
/// - records which optional features were granted
///
/// There is no window surface. Frames leave the GPU through read-back streams.
pub struct Gpu {
    /// wgpu instance used to create the adapter.
    instance: wgpu::Instance,

    /// Selected adapter.
    adapter: wgpu::Adapter,

    /// Logical device.
    device: wgpu::Device,

    /// Command queue.
    queue: wgpu::Queue,

    /// Parameters the context was created with.
    init: GpuInit,
}

impl Gpu {
    /// Creates a headless GPU context.
    ///
    /// Adapter/device acquisition is asynchronous under wgpu.
    pub async fn new(init: GpuInit) -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: init.backends,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: init.power_preference,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .context("failed to find a suitable GPU adapter")?;

        let mut required_features = wgpu::Features::empty();
        if init.mappable_primary_buffers
            && adapter
                .features()
                .contains(wgpu::Features::MAPPABLE_PRIMARY_BUFFERS)
        {
            required_features |= wgpu::Features::MAPPABLE_PRIMARY_BUFFERS;
        }

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("pixstream device"),
                required_features,
                required_limits: init.required_limits.clone(),
                experimental_features: wgpu::ExperimentalFeatures::disabled(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            })
            .await
            .context("failed to create wgpu device/queue")?;

        let info = adapter.get_info();
        log::info!(
            "gpu: {} ({:?}, {:?}), features {:?}",
            info.name,
            info.backend,
            info.device_type,
            device.features()
        );

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
            init,
        })
    }

    /// Blocking variant of [`Gpu::new`] for render threads without an executor.
    pub fn new_blocking(init: GpuInit) -> Result<Self> {
        pollster::block_on(Self::new(init))
    }

    /// Returns the wgpu instance.
    pub fn instance(&self) -> &wgpu::Instance {
        &self.instance
    }

    /// Returns the selected adapter.
    pub fn adapter(&self) -> &wgpu::Adapter {
        &self.adapter
    }

    /// Returns a reference to the logical device.
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// Returns a reference to the command queue.
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Returns the creation parameters.
    pub fn init(&self) -> &GpuInit {
        &self.init
    }
}
