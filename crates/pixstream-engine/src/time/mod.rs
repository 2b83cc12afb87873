//! Time subsystem.
//!
//! Throughput measurement for render loops without coupling to the runtime.
//! Intended usage:
//! - one `RateMeter` per loop
//! - call `tick()` once per frame; it yields a `RateSample` once per interval

mod rate;

pub use rate::{RateMeter, RateSample};
