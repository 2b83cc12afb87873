use crate::device::{TransferDevice, TransferDirection};
use crate::error::{Result, StreamError};
use crate::format::{Extent, FrameLayout};

use super::config::StreamConfig;
use super::handler::StreamHandler;
use super::msaa::{self, RenderTargets};
use super::pool::BufferPool;
use super::stats::StreamStats;
use super::sync::{self, SyncKind, WaitPolicy};
use super::{Lifecycle, Transfer};

/// Streams rendered frames from the GPU to a [`StreamHandler`].
///
/// Per render iteration: [`bind`](Self::bind) to get the render target, draw
/// into it, then [`swap`](Self::swap) to capture it. With a ring of `T` slots
/// the handler may hold up to `T - 1` frames; once it holds them all, `swap`
/// blocks until one is released.
///
/// The first `T - 1` frames after each (re)allocation are delivered without
/// latency by copying them into the slot handed out; afterwards the handler
/// receives the frame captured one `swap` earlier.
///
/// Dropping the stream drains it like [`destroy`](Self::destroy), so every
/// outstanding lease must be released first, including leases stored in the
/// handler itself.
pub struct ReadbackStream<D: TransferDevice, H: StreamHandler> {
    device: D,
    handler: H,
    config: StreamConfig,
    reconfigure: bool,
    samples: u32,
    pool: BufferPool<D>,
    targets: Option<RenderTargets<D>>,
    cursor: u64,
    synchronous_frames: usize,
    stats: StreamStats,
    lifecycle: Lifecycle,
}

impl<D: TransferDevice, H: StreamHandler> ReadbackStream<D, H> {
    /// Creates a stream. Nothing is allocated until the first [`bind`](Self::bind).
    ///
    /// # Errors
    /// [`StreamError::UnsupportedCapability`] when multisampling is requested
    /// on a device without it.
    ///
    /// # Panics
    /// If `config.buffer_count` is zero.
    pub fn new(device: D, handler: H, config: StreamConfig) -> Result<Self> {
        let caps = device.capabilities();
        let samples = msaa::check_samples(config.sample_count, &caps)?;
        let sync = sync::select(&caps, config.prefer_pinned_memory);
        let pool = BufferPool::new(config.buffer_count, TransferDirection::Readback, sync, WaitPolicy::from(&config));

        log::debug!(
            "read-back stream: {} buffers, {} samples, {:?}",
            config.buffer_count,
            samples,
            pool.sync_kind(),
        );

        Ok(Self {
            device,
            handler,
            config,
            reconfigure: false,
            samples,
            pool,
            targets: None,
            cursor: 0,
            synchronous_frames: 0,
            stats: StreamStats::default(),
            lifecycle: Lifecycle::Active,
        })
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn stats(&self) -> StreamStats {
        self.stats
    }

    /// Layout of the frames currently delivered; empty before the first allocation.
    pub fn layout(&self) -> FrameLayout {
        self.pool.layout()
    }

    /// Effective sample count of the render target.
    pub fn sample_count(&self) -> u32 {
        self.samples
    }

    pub fn sync_kind(&self) -> SyncKind {
        self.pool.sync_kind()
    }

    /// Render target of the current allocation.
    pub fn render_target(&self) -> Option<&D::Surface> {
        self.targets.as_ref().map(RenderTargets::render)
    }

    /// Changes the ring size; takes effect on the next [`bind`](Self::bind).
    ///
    /// # Panics
    /// If `count` is zero.
    pub fn set_buffer_count(&mut self, count: usize) {
        assert!(count >= 1, "a stream needs at least one buffer");
        if count != self.config.buffer_count {
            self.config.buffer_count = count;
            self.reconfigure = true;
        }
    }

    /// Changes the MSAA sample count; takes effect on the next [`bind`](Self::bind).
    pub fn set_sample_count(&mut self, samples: u32) {
        if samples != self.config.sample_count {
            self.config.sample_count = samples;
            self.reconfigure = true;
        }
    }

    /// Returns the surface to render the next frame into, reallocating first
    /// if the handler's size or the configuration changed.
    ///
    /// `None` while the handler reports a zero size.
    pub fn bind(&mut self) -> Result<Option<&D::Surface>> {
        self.lifecycle.ensure_active()?;

        let extent = Extent::new(self.handler.width(), self.handler.height());
        if self.reconfigure || extent != self.pool.layout().extent {
            if let Err(err) = self.reallocate(extent) {
                return Err(self.terminate(err));
            }
        }
        Ok(self.render_target())
    }

    /// Captures the render target and hands a frame to the handler.
    ///
    /// Blocks when the slot about to be reused is still held by the handler.
    pub fn swap(&mut self) -> Result<Transfer> {
        self.lifecycle.ensure_active()?;
        if !self.pool.is_allocated() {
            return Ok(Transfer::Skipped);
        }

        match self.capture() {
            Ok(transfer) => Ok(transfer),
            Err(err) => Err(self.terminate(err)),
        }
    }

    /// Waits for the handler and the GPU to finish with every slot, then
    /// releases all device objects. Further calls return [`StreamError::Closed`].
    pub fn destroy(&mut self) -> Result<()> {
        if self.lifecycle == Lifecycle::Destroyed {
            return Ok(());
        }
        self.lifecycle = Lifecycle::Destroyed;

        let drained = self.pool.destroy(&mut self.device);
        self.targets = None;
        log::debug!("read-back stream destroyed after {} frames", self.stats.frames);
        drained
    }

    fn capture(&mut self) -> Result<Transfer> {
        let count = self.pool.count() as u64;
        let trg = self.pool.index(self.cursor);
        let src = self.pool.index(self.cursor + count - 1);

        let Some(targets) = self.targets.as_ref() else {
            return Ok(Transfer::Skipped);
        };
        let source = targets.prepare_read(&mut self.device)?;

        if self.pool.is_busy(trg) {
            if self.pool.wait_for_processing_complete(&mut self.device, trg)? {
                self.stats.stalls += 1;
            }
            self.stats.reclaims += 1;
        }
        self.pool.wait_for_gpu(&mut self.device, trg)?;

        self.device.read_pixels(source, self.pool.buffer(trg), &self.pool.layout())?;
        self.pool.submitted(&mut self.device, trg);

        if self.synchronous_frames > 0 {
            self.pool.copy_slot(&mut self.device, trg, src)?;
            self.synchronous_frames -= 1;
            self.stats.warmup_copies += 1;
        }

        let index = self.stats.frames;
        let frame = self.pool.lease(&mut self.device, src, index)?;
        self.handler.process(frame);

        self.stats.frames += 1;
        self.cursor += 1;
        Ok(Transfer::Frame(index))
    }

    fn reallocate(&mut self, extent: Extent) -> Result<()> {
        let caps = self.device.capabilities();
        if extent.width > caps.max_dimension || extent.height > caps.max_dimension {
            return Err(StreamError::InvalidDimensions {
                width: extent.width,
                height: extent.height,
                reason: "exceeds the device limit",
            });
        }
        let layout = FrameLayout::new(extent, caps.row_alignment)?;

        self.pool.destroy(&mut self.device)?;
        self.targets = None;

        if self.reconfigure {
            self.samples = msaa::check_samples(self.config.sample_count, &caps)?;
            self.pool.set_count(self.config.buffer_count);
            self.reconfigure = false;
        }

        self.pool.resize(&mut self.device, layout)?;
        if layout.is_empty() {
            log::debug!("read-back stream idle ({}x{})", extent.width, extent.height);
            return Ok(());
        }

        self.targets = Some(RenderTargets::new(&mut self.device, extent, self.samples)?);
        let count = self.pool.count();
        self.cursor = count as u64 - 1;
        self.synchronous_frames = count - 1;
        self.stats.reallocations += 1;
        Ok(())
    }

    fn terminate(&mut self, err: StreamError) -> StreamError {
        log::error!("read-back stream terminated: {err}");
        self.lifecycle = Lifecycle::Failed;
        err
    }
}

impl<D: TransferDevice, H: StreamHandler> Drop for ReadbackStream<D, H> {
    fn drop(&mut self) {
        if let Err(err) = self.destroy() {
            log::error!("read-back stream drain failed: {err}");
        }
    }
}
