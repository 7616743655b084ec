//! Outbound calls: the reflex tier and downstream arms
//!
//! Every call goes through [`ResilientClient`], which owns one circuit
//! breaker per dependency and retries transient failures inside the
//! caller's deadline.

pub mod arm;
pub mod breaker;
pub mod error;
pub mod reflex;
pub mod resilient;

pub use arm::{ArmClient, ArmDescriptor, ArmRequest, ArmResponse, HttpArmClient, IDEMPOTENCY_HEADER};
pub use breaker::{BreakerConfig, BreakerPermit, BreakerRegistry, BreakerStatus, CircuitBreaker, CircuitBreakerState};
pub use error::UpstreamError;
pub use reflex::{HttpReflexClient, LocalReflex, ReflexGateway};
pub use resilient::ResilientClient;

/// Breaker key of the reflex dependency
pub const REFLEX_DEPENDENCY: &str = "reflex";

/// Breaker key of one arm
pub fn arm_dependency(arm_id: &str) -> String {
    format!("arm:{}", arm_id)
}
