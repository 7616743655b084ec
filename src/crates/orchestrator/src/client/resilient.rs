//! Breaker-guarded calls with retry inside a deadline

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tooling::async_utils::RetryPolicy;
use tooling::metrics::Counter;
use tracing::debug;

use super::breaker::BreakerRegistry;
use super::error::UpstreamError;

/// Wraps outbound calls with a circuit breaker and a retry policy
///
/// Only errors with [`UpstreamError::is_retryable`] are retried, and never
/// past the caller's deadline. A short-circuited call fails immediately with
/// [`UpstreamError::CircuitOpen`].
#[derive(Debug, Clone)]
pub struct ResilientClient {
    breakers: Arc<BreakerRegistry>,
    retry: RetryPolicy,
    retries: Counter,
    short_circuits: Counter,
}

impl ResilientClient {
    pub fn new(breakers: Arc<BreakerRegistry>, retry: RetryPolicy) -> Self {
        Self {
            breakers,
            retry,
            retries: Counter::new(),
            short_circuits: Counter::new(),
        }
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    pub fn retries(&self) -> u64 {
        self.retries.get()
    }

    pub fn short_circuits(&self) -> u64 {
        self.short_circuits.get()
    }

    pub async fn call<T, F, Fut>(
        &self,
        dependency: &str,
        deadline: Option<Instant>,
        mut op: F,
    ) -> Result<T, UpstreamError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        let breaker = self.breakers.get(dependency);
        let mut attempts = 0usize;
        let mut waited = Duration::ZERO;

        loop {
            attempts += 1;
            let permit = breaker.try_acquire().map_err(|retry_after| {
                self.short_circuits.inc();
                UpstreamError::CircuitOpen {
                    dependency: dependency.to_string(),
                    retry_after,
                }
            })?;

            let outcome = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, op()).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(UpstreamError::Timeout(format!(
                        "{} did not answer before the deadline",
                        dependency
                    ))),
                },
                None => op().await,
            };

            let error = match outcome {
                Ok(value) => {
                    permit.success();
                    return Ok(value);
                }
                Err(error) => error,
            };

            match &error {
                e if e.trips_breaker() => permit.failure(),
                UpstreamError::Cancelled => drop(permit),
                // Answered, just not with what we wanted
                _ => permit.success(),
            }

            if !error.is_retryable() {
                return Err(error);
            }

            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            let Some(delay) = self.retry.next_delay(attempts, waited, remaining) else {
                debug!(dependency, attempts, "Retries exhausted: {}", error);
                return Err(error);
            };

            self.retries.inc();
            debug!(
                dependency,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                "Call failed: {}. Retrying...",
                error
            );
            tokio::time::sleep(delay).await;
            waited += delay;
        }
    }
}
