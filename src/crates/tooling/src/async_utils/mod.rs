//! Async utilities for common async patterns
//!
//! - Retry policies with exponential backoff, jitter and a total wait budget
//! - `Retry-After` parsing for upstream throttling

pub mod retry;

pub use retry::{parse_retry_after, RetryPolicy};
