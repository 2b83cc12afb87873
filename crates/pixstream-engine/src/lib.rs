//! Pixstream engine crate.
//!
//! This crate owns the GPU ↔ host pixel streaming core: a read-back stream
//! delivering rendered frames to host memory, an upload stream feeding host
//! frames into a sampled texture, and the device backends both run on.

pub mod device;
pub mod error;
pub mod format;
pub mod stream;
pub mod time;

pub mod logging;

pub use error::{Result, StreamError};
