//! Shared tooling for the reflex and orchestrator services
//!
//! # Modules
//!
//! - `async_utils` - Retry policies with exponential backoff and a wait budget
//! - `config` - Environment overrides layered over file configuration
//! - `logging` - Subscriber setup and log-safe formatting helpers
//! - `metrics` - Atomic counters, histograms and Prometheus text output
//! - `rate_limit` - Lazily refilled token bucket arithmetic
//! - `serialization` - SHA-256 digests

pub mod async_utils;
pub mod config;
pub mod logging;
pub mod metrics;
pub mod rate_limit;
pub mod serialization;

use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Errors raised while reading configuration or installing the subscriber
#[derive(Debug, Error)]
pub enum ToolingError {
    #[error("{0}")]
    General(String),
}

/// Result type for tooling operations
pub type Result<T> = std::result::Result<T, ToolingError>;

/// Milliseconds since the Unix epoch
///
/// A clock set before 1970 reads as zero.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Get version information
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
