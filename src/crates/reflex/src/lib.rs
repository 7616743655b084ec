//! Reflex tier: fast screening in front of the orchestrator
//!
//! A request passes through a content-addressed cache, a multi-dimension
//! rate limiter and two pattern scanners (PII and prompt injection) before
//! anything expensive happens. Shared state lives behind the [`store`]
//! traits so several service instances can share one backing store, and
//! tests can swap in an in-memory one.
//!
//! ```rust,ignore
//! use reflex::{PreprocessRequest, ReflexConfig, ReflexPipeline};
//! use reflex::ratelimit::Caller;
//!
//! let pipeline = ReflexPipeline::from_config(ReflexConfig::default()).await?;
//! let result = pipeline
//!     .process(PreprocessRequest::new("My SSN is 123-45-6789"), &Caller::user("alice"))
//!     .await?;
//! assert!(!result.safe);
//! ```

pub mod cache;
pub mod clock;
pub mod config;
pub mod http;
pub mod injection;
pub mod metrics;
pub mod pii;
pub mod pipeline;
pub mod ratelimit;
pub mod store;
pub mod text;

mod severity;

pub use config::ReflexConfig;
pub use pipeline::{FailurePolicy, PreprocessRequest, PreprocessResult, Purged, ReflexPipeline};
pub use severity::Severity;

use std::time::Duration;
use thiserror::Error;

use crate::ratelimit::Dimension;

/// Errors returned by the reflex pipeline
#[derive(Debug, Error)]
pub enum ReflexError {
    /// Malformed request
    #[error("Validation error: {0}")]
    Validation(String),

    /// A rate-limit dimension is exhausted
    #[error("Rate limit exceeded on {dimension} (retry after {}ms)", retry_after.as_millis())]
    RateLimited {
        dimension: Dimension,
        retry_after: Duration,
    },

    /// Shared store unreachable under a fail-closed policy
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Overall pipeline deadline elapsed
    #[error("Pipeline deadline of {}ms exceeded", .0.as_millis())]
    DeadlineExceeded(Duration),

    /// Caller cancelled the request
    #[error("Request cancelled")]
    Cancelled,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal failure (detector task panicked, serialization)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ReflexError {
    /// Whether a caller may retry the same request later
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ReflexError::StoreUnavailable(_) | ReflexError::DeadlineExceeded(_)
        )
    }
}

impl From<serde_json::Error> for ReflexError {
    fn from(err: serde_json::Error) -> Self {
        ReflexError::Internal(format!("serialization: {}", err))
    }
}

/// Result type for reflex operations
pub type Result<T> = std::result::Result<T, ReflexError>;
