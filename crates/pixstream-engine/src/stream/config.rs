use std::time::Duration;

/// Stream configuration.
///
/// Buffer and sample counts can be changed on a live stream; the ring is
/// reallocated on the next `bind()` / `begin_frame()`.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    /// Ring size. Fewer buffers use less memory and allow fewer frames in
    /// flight; 3 gives the best overlap in most cases. Must be at least 1.
    pub buffer_count: usize,

    /// MSAA sample count for read-back render targets. Values of 0 or 1
    /// disable multisampling; larger values are clamped to the device maximum.
    pub sample_count: u32,

    /// Use pinned host memory with fences when the device supports it.
    pub prefer_pinned_memory: bool,

    /// Ceiling for GPU fence waits. Exceeding it terminates the stream.
    pub gpu_timeout: Duration,

    /// Interval after which a wait on a handler-held slot is logged as a stall.
    pub stall_warning: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            buffer_count: 2,
            sample_count: 1,
            prefer_pinned_memory: true,
            gpu_timeout: Duration::from_secs(5),
            stall_warning: Duration::from_secs(1),
        }
    }
}

impl StreamConfig {
    pub fn with_buffer_count(mut self, buffer_count: usize) -> Self {
        self.buffer_count = buffer_count;
        self
    }

    pub fn with_sample_count(mut self, sample_count: u32) -> Self {
        self.sample_count = sample_count;
        self
    }

    pub fn with_pinned_memory(mut self, prefer: bool) -> Self {
        self.prefer_pinned_memory = prefer;
        self
    }
}
