//! Error handling and failure statistics.
//!
//! This module provides:
//! - The exchange error type (`ClientError`) and its `Status` mapping
//! - Initialization and configuration errors
//! - The `ErrorKind` taxonomy and per-kind failure counters
//!
//! Only `ClientError::UnexpectedClose` is ever retried; every other error is
//! terminal for its exchange.

mod stats;
mod types;

// Re-export public API
pub use stats::ErrorStats;
pub use types::{ClientError, ConfigError, ErrorKind, InitializationError, Status};
