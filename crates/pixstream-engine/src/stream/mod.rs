//! Pixel streams between GPU and host.
//!
//! This module is responsible for:
//! - the slot ring shared by both directions (`pool`, `sync`)
//! - the read-back stream: render target → handler (`ReadbackStream`)
//! - the upload stream: handler → sampled texture (`UploadStream`)
//! - multisample resolve ahead of read-back (`msaa`)
//!
//! Both streams are driven from one render thread. Handlers receive a
//! [`FrameLease`] and may finish with it on any thread.

mod config;
mod handler;
mod msaa;
mod pool;
mod readback;
mod stats;
mod sync;
mod upload;

pub use config::StreamConfig;
pub use handler::{FrameLease, ReleaseSignal, StreamHandler};
pub use readback::ReadbackStream;
pub use stats::StreamStats;
pub use sync::SyncKind;
pub use upload::UploadStream;

use crate::error::{Result, StreamError};

/// Outcome of one stream step.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Transfer {
    /// The handler reported a zero-sized frame; nothing was issued.
    Skipped,
    /// A frame with this sequence index was handed to the handler.
    Frame(u64),
}

impl Transfer {
    #[inline]
    pub fn is_skipped(self) -> bool {
        matches!(self, Self::Skipped)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Lifecycle {
    Active,
    Failed,
    Destroyed,
}

impl Lifecycle {
    fn ensure_active(self) -> Result<()> {
        match self {
            Self::Active => Ok(()),
            Self::Failed | Self::Destroyed => Err(StreamError::Closed),
        }
    }
}
