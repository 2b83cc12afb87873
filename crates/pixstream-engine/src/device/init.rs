/// Initialization parameters for the headless GPU context.
///
/// Keep this structure small. Add flags only when a transfer path needs them.
#[derive(Debug, Clone)]
pub struct GpuInit {
    /// Backends wgpu may pick from.
    pub backends: wgpu::Backends,

    /// Adapter selection hint.
    pub power_preference: wgpu::PowerPreference,

    /// Request `MAPPABLE_PRIMARY_BUFFERS` when the adapter offers it.
    ///
    /// Enables GPU-side copies between mappable transfer buffers during
    /// read-back warm-up. Typically only available on unified-memory adapters.
    pub mappable_primary_buffers: bool,

    /// Limits requested from the adapter/device.
    pub required_limits: wgpu::Limits,

    /// Ceiling for blocking waits issued while mapping buffers.
    pub map_timeout: std::time::Duration,
}

impl Default for GpuInit {
    fn default() -> Self {
        Self {
            backends: wgpu::Backends::all(),
            power_preference: wgpu::PowerPreference::HighPerformance,
            mappable_primary_buffers: true,
            required_limits: wgpu::Limits::default(),
            map_timeout: std::time::Duration::from_secs(5),
        }
    }
}
