use std::time::Duration;

use thiserror::Error;

/// Errors raised by the streaming core and its device backends.
///
/// A zero-sized source is not represented here: it is a legal transient state
/// and the stream operations report it as [`Transfer::Skipped`].
///
/// [`Transfer::Skipped`]: crate::stream::Transfer::Skipped
#[derive(Debug, Error)]
pub enum StreamError {
    /// A required device feature is absent. Raised at construction; not retried.
    #[error("unsupported capability: {0}")]
    UnsupportedCapability(&'static str),

    /// Requested dimensions cannot be allocated on this device.
    #[error("invalid dimensions {width} x {height}: {reason}")]
    InvalidDimensions {
        width: u32,
        height: u32,
        reason: &'static str,
    },

    /// A GPU-side wait exceeded the configured ceiling.
    #[error("{what} did not complete within {waited:?}")]
    SynchronizationTimeout { what: &'static str, waited: Duration },

    /// The backend rejected an operation.
    #[error("device error: {0}")]
    Device(String),

    /// The stream was destroyed or terminated by an earlier failure.
    #[error("stream is closed")]
    Closed,
}

impl StreamError {
    pub(crate) fn device(msg: impl Into<String>) -> Self {
        Self::Device(msg.into())
    }
}

pub type Result<T, E = StreamError> = std::result::Result<T, E>;
