//! Logging utilities.
//!
//! Centralizes logger initialization. Library code only uses the `log` facade;
//! binaries and tests pick the backend here.

mod init;

pub use init::{init_logging, init_test_logging, LoggingConfig};
