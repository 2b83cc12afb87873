use crate::device::{TransferDevice, TransferDirection};
use crate::error::{Result, StreamError};
use crate::format::{Extent, FrameLayout};

use super::config::StreamConfig;
use super::handler::StreamHandler;
use super::pool::BufferPool;
use super::stats::StreamStats;
use super::sync::{self, SyncKind, WaitPolicy};
use super::{Lifecycle, Transfer};

/// Streams frames written by a [`StreamHandler`] into a sampled texture.
///
/// The producer side calls [`begin_frame`](Self::begin_frame) to obtain a slot
/// to fill; the render side calls [`bind`](Self::bind) whenever it samples the
/// texture. `bind` uploads the oldest finished slot and never waits for the
/// producer, except on the first frame after an allocation. `begin_frame`
/// blocks once the producer holds every slot.
///
/// Dropping the stream drains it like [`destroy`](Self::destroy); every
/// outstanding lease must be released first.
pub struct UploadStream<D: TransferDevice, H: StreamHandler> {
    device: D,
    handler: H,
    config: StreamConfig,
    reconfigure: bool,
    pool: BufferPool<D>,
    texture: Option<D::Texture>,
    reset_texture: bool,
    cursor: u64,
    upload_cursor: u64,
    stats: StreamStats,
    lifecycle: Lifecycle,
}

impl<D: TransferDevice, H: StreamHandler> UploadStream<D, H> {
    /// Creates a stream. Nothing is allocated until the first
    /// [`begin_frame`](Self::begin_frame).
    ///
    /// # Panics
    /// If `config.buffer_count` is zero.
    pub fn new(device: D, handler: H, config: StreamConfig) -> Self {
        let caps = device.capabilities();
        let sync = sync::select(&caps, config.prefer_pinned_memory);
        let pool = BufferPool::new(config.buffer_count, TransferDirection::Upload, sync, WaitPolicy::from(&config));

        log::debug!("upload stream: {} buffers, {:?}", config.buffer_count, pool.sync_kind());

        Self {
            device,
            handler,
            config,
            reconfigure: false,
            pool,
            texture: None,
            reset_texture: true,
            cursor: 0,
            upload_cursor: 0,
            stats: StreamStats::default(),
            lifecycle: Lifecycle::Active,
        }
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

    pub fn layout(&self) -> FrameLayout {
        self.pool.layout()
    }

    pub fn sync_kind(&self) -> SyncKind {
        self.pool.sync_kind()
    }

    /// Texture as of the last upload, without uploading anything.
    pub fn texture(&self) -> Option<&D::Texture> {
        self.texture.as_ref()
    }

    /// Changes the ring size; takes effect on the next [`begin_frame`](Self::begin_frame).
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

    /// Hands the next slot to the handler for writing.
    ///
    /// Reallocates first if the handler's size or the configuration changed.
    /// Blocks when the slot about to be reused is still held by the handler.
    pub fn begin_frame(&mut self) -> Result<Transfer> {
        self.lifecycle.ensure_active()?;

        match self.produce() {
            Ok(transfer) => Ok(transfer),
            Err(err) => Err(self.terminate(err)),
        }
    }

    /// Brings the texture up to date with the oldest finished frame and returns it.
    ///
    /// If that frame is still being written, the previous contents are kept
    /// and [`StreamStats::stale_binds`] is incremented. `None` until the first
    /// upload.
    pub fn bind(&mut self) -> Result<Option<&D::Texture>> {
        self.lifecycle.ensure_active()?;

        if self.pool.is_allocated() {
            if let Err(err) = self.catch_up() {
                return Err(self.terminate(err));
            }
        }
        Ok(self.texture.as_ref())
    }

    /// Waits for the handler and the GPU to finish with every slot, then
    /// releases all device objects. Further calls return [`StreamError::Closed`].
    pub fn destroy(&mut self) -> Result<()> {
        if self.lifecycle == Lifecycle::Destroyed {
            return Ok(());
        }
        self.lifecycle = Lifecycle::Destroyed;

        let drained = self.pool.destroy(&mut self.device);
        self.texture = None;
        log::debug!(
            "upload stream destroyed after {} frames, {} uploads",
            self.stats.frames,
            self.stats.uploads
        );
        drained
    }

    fn produce(&mut self) -> Result<Transfer> {
        let extent = Extent::new(self.handler.width(), self.handler.height());
        if self.reconfigure || extent != self.pool.layout().extent {
            self.reallocate(extent)?;
        }
        if !self.pool.is_allocated() {
            return Ok(Transfer::Skipped);
        }

        let trg = self.pool.index(self.cursor);
        if self.pool.is_busy(trg) {
            if self.pool.wait_for_processing_complete(&mut self.device, trg)? {
                self.stats.stalls += 1;
            }
            self.stats.reclaims += 1;
            self.upload_to_texture(trg)?;
        }

        let index = self.stats.frames;
        let frame = self.pool.lease(&mut self.device, trg, index)?;
        self.handler.process(frame);

        self.stats.frames += 1;
        self.cursor += 1;
        Ok(Transfer::Frame(index))
    }

    fn catch_up(&mut self) -> Result<()> {
        let src = self.pool.index(self.upload_cursor);
        if !self.pool.is_busy(src) {
            return Ok(());
        }

        if self.reset_texture {
            if self.pool.wait_for_processing_complete(&mut self.device, src)? {
                self.stats.stalls += 1;
            }
        } else if !self.pool.try_reclaim(&mut self.device, src)? {
            self.stats.stale_binds += 1;
            log::trace!("upload slot {src} still being written; keeping previous texture");
            return Ok(());
        }

        self.stats.reclaims += 1;
        self.upload_to_texture(src)
    }

    fn upload_to_texture(&mut self, i: usize) -> Result<()> {
        self.pool.release_host(&mut self.device, i)?;

        let layout = self.pool.layout();
        if self.reset_texture || self.texture.is_none() {
            self.texture = Some(self.device.create_texture(layout.extent)?);
            self.reset_texture = false;
            self.stats.texture_allocations += 1;
            log::debug!("upload texture allocated ({}x{})", layout.width(), layout.height());
        }

        if let Some(texture) = &self.texture {
            self.device.upload_texture(self.pool.buffer(i), texture, &layout)?;
            self.pool.submitted(&mut self.device, i);
        }
        self.upload_cursor += 1;
        self.stats.uploads += 1;
        Ok(())
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
        if self.reconfigure {
            self.pool.set_count(self.config.buffer_count);
            self.reconfigure = false;
        }

        self.pool.resize(&mut self.device, layout)?;
        self.cursor = 0;
        self.upload_cursor = 0;
        self.reset_texture = true;
        if layout.is_empty() {
            log::debug!("upload stream idle ({}x{})", extent.width, extent.height);
        } else {
            self.stats.reallocations += 1;
        }
        Ok(())
    }

    fn terminate(&mut self, err: StreamError) -> StreamError {
        log::error!("upload stream terminated: {err}");
        self.lifecycle = Lifecycle::Failed;
        err
    }
}

impl<D: TransferDevice, H: StreamHandler> Drop for UploadStream<D, H> {
    fn drop(&mut self) {
        if let Err(err) = self.destroy() {
            log::error!("upload stream drain failed: {err}");
        }
    }
}
