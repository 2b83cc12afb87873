/// Per-stream counters for diagnosing throughput and staleness.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct StreamStats {
    /// Frames handed to the handler.
    pub frames: u64,
    /// Slots reclaimed from the handler before reuse.
    pub reclaims: u64,
    /// Reclaims that had to block because the handler still held the slot.
    pub stalls: u64,
    /// Warm-up copies issued after (re)allocation.
    pub warmup_copies: u64,
    /// Texture updates issued (upload streams).
    pub uploads: u64,
    /// Texture allocations (upload streams).
    pub texture_allocations: u64,
    /// `bind()` calls that kept showing an older texture because the newest
    /// slot was not finished yet.
    pub stale_binds: u64,
    /// Ring allocations, including the first.
    pub reallocations: u64,
}
