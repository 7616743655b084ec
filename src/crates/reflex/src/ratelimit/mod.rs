//! Multi-dimension token-bucket rate limiting
//!
//! One admission check charges every applicable dimension (user, source
//! address, endpoint, global) in a single atomic store call. If any
//! dimension is exhausted nothing is charged and the denial names the
//! dimension with the longest wait.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tooling::rate_limit::BucketConfig;

use crate::clock::Clock;
use crate::store::{Admission, BucketRequest, BucketStore, StoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    User,
    Ip,
    Endpoint,
    Global,
}

impl Dimension {
    pub const ALL: [Dimension; 4] = [
        Dimension::User,
        Dimension::Ip,
        Dimension::Endpoint,
        Dimension::Global,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Dimension::User => "user",
            Dimension::Ip => "ip",
            Dimension::Endpoint => "endpoint",
            Dimension::Global => "global",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who is asking; missing identities skip their dimension
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub user_id: Option<String>,
    pub ip: Option<String>,
    pub endpoint: Option<String>,
}

impl Caller {
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::default()
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }
}

/// Subscription presets for per-user limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Basic,
    Pro,
    Enterprise,
}

impl Tier {
    /// Burst capacity and hourly refill
    pub fn bucket(self) -> BucketConfig {
        let (capacity, per_hour) = match self {
            Tier::Free => (10.0, 100.0),
            Tier::Basic => (50.0, 1_000.0),
            Tier::Pro => (100.0, 10_000.0),
            Tier::Enterprise => (500.0, 100_000.0),
        };
        BucketConfig::new(capacity, per_hour / 3600.0)
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "free" => Ok(Tier::Free),
            "basic" => Ok(Tier::Basic),
            "pro" => Ok(Tier::Pro),
            "enterprise" => Ok(Tier::Enterprise),
            other => Err(format!("unknown tier: {}", other)),
        }
    }
}

/// Bucket settings per dimension; `None` disables a dimension
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RateLimitPolicy {
    pub user: Option<BucketConfig>,
    pub ip: Option<BucketConfig>,
    pub endpoint: Option<BucketConfig>,
    pub global: Option<BucketConfig>,
}

impl RateLimitPolicy {
    /// Hourly limits with burst equal to the limit; 0 disables a dimension
    pub fn per_hour(user: u64, ip: u64, endpoint: u64, global: u64) -> Self {
        let bucket = |limit: u64| (limit > 0).then(|| BucketConfig::per_hour(limit));
        Self {
            user: bucket(user),
            ip: bucket(ip),
            endpoint: bucket(endpoint),
            global: bucket(global),
        }
    }

    pub fn with_user_tier(mut self, tier: Tier) -> Self {
        self.user = Some(tier.bucket());
        self
    }

    fn config(&self, dimension: Dimension) -> Option<BucketConfig> {
        match dimension {
            Dimension::User => self.user,
            Dimension::Ip => self.ip,
            Dimension::Endpoint => self.endpoint,
            Dimension::Global => self.global,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Allowed {
        /// Smallest remaining whole-token count across charged dimensions
        remaining: Option<u64>,
    },
    Denied {
        dimension: Dimension,
        retry_after: Duration,
    },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }
}

/// Bucket key for one dimension, e.g. `ratelimit:user:alice`
pub fn bucket_key(dimension: Dimension, identity: Option<&str>) -> String {
    match identity {
        Some(id) => format!("ratelimit:{}:{}", dimension, id),
        None => format!("ratelimit:{}", dimension),
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn BucketStore>,
    clock: Arc<dyn Clock>,
    policy: RateLimitPolicy,
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    pub fn new(store: Arc<dyn BucketStore>, clock: Arc<dyn Clock>, policy: RateLimitPolicy) -> Self {
        Self {
            store,
            clock,
            policy,
        }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    fn requests(&self, caller: &Caller, cost: f64) -> Vec<(Dimension, BucketRequest)> {
        Dimension::ALL
            .iter()
            .filter_map(|&dimension| {
                let config = self.policy.config(dimension)?;
                let key = match dimension {
                    Dimension::User => bucket_key(dimension, Some(caller.user_id.as_deref()?)),
                    Dimension::Ip => bucket_key(dimension, Some(caller.ip.as_deref()?)),
                    Dimension::Endpoint => bucket_key(dimension, Some(caller.endpoint.as_deref()?)),
                    Dimension::Global => bucket_key(dimension, None),
                };
                Some((dimension, BucketRequest { key, config, cost }))
            })
            .collect()
    }

    /// Charge `cost` against every dimension that applies to `caller`
    pub async fn check_and_consume(&self, caller: &Caller, cost: f64) -> StoreResult<Decision> {
        let planned = self.requests(caller, cost);
        if planned.is_empty() {
            return Ok(Decision::Allowed { remaining: None });
        }

        let (dimensions, requests): (Vec<Dimension>, Vec<BucketRequest>) = planned.into_iter().unzip();
        let admission = self
            .store
            .consume_all(&requests, self.clock.now_ms())
            .await?;

        Ok(match admission {
            Admission::Allowed { remaining } => Decision::Allowed {
                remaining: remaining.into_iter().min(),
            },
            Admission::Denied { index, retry_after } => {
                let dimension = dimensions.get(index).copied().unwrap_or(Dimension::Global);
                tracing::debug!(dimension = %dimension, retry_after_ms = retry_after.as_millis() as u64, "Rate limit denied");
                Decision::Denied {
                    dimension,
                    retry_after,
                }
            }
        })
    }

    /// Evict buckets that have refilled to capacity
    pub async fn purge_idle(&self) -> StoreResult<u64> {
        self.store.purge_idle(self.clock.now_ms()).await
    }

    /// Whole tokens left in one dimension for `caller`
    pub async fn remaining(&self, caller: &Caller, dimension: Dimension) -> StoreResult<Option<u64>> {
        let Some((_, req)) = self
            .requests(caller, 0.0)
            .into_iter()
            .find(|(d, _)| *d == dimension)
        else {
            return Ok(None);
        };
        let available = self
            .store
            .peek(&req.key, &req.config, self.clock.now_ms())
            .await?;
        Ok(Some(available))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;

    fn limiter(policy: RateLimitPolicy) -> (RateLimiter, ManualClock) {
        let clock = ManualClock::new(1_700_000_000_000);
        let limiter = RateLimiter::new(Arc::new(MemoryStore::new()), Arc::new(clock.clone()), policy);
        (limiter, clock)
    }

    #[test]
    fn test_bucket_keys() {
        assert_eq!(bucket_key(Dimension::User, Some("alice")), "ratelimit:user:alice");
        assert_eq!(bucket_key(Dimension::Global, None), "ratelimit:global");
    }

    #[tokio::test]
    async fn test_exactly_capacity_allowed() {
        let (limiter, _) = limiter(RateLimitPolicy::per_hour(100, 0, 0, 0));
        let caller = Caller::user("alice");

        let mut allowed = 0;
        let mut denied = 0;
        for _ in 0..1000 {
            match limiter.check_and_consume(&caller, 1.0).await.unwrap() {
                Decision::Allowed { .. } => allowed += 1,
                Decision::Denied { retry_after, dimension } => {
                    assert!(retry_after > Duration::ZERO);
                    assert_eq!(dimension, Dimension::User);
                    denied += 1;
                }
            }
        }
        assert_eq!((allowed, denied), (100, 900));
    }

    #[tokio::test]
    async fn test_refill_is_lazy() {
        let (limiter, clock) = limiter(RateLimitPolicy::per_hour(3600, 0, 0, 0));
        let caller = Caller::user("bob");
        for _ in 0..3600 {
            assert!(limiter.check_and_consume(&caller, 1.0).await.unwrap().is_allowed());
        }
        assert!(!limiter.check_and_consume(&caller, 1.0).await.unwrap().is_allowed());

        clock.advance(Duration::from_secs(1));
        assert!(limiter.check_and_consume(&caller, 1.0).await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn test_dimensions_are_independent() {
        let (limiter, _) = limiter(RateLimitPolicy::per_hour(1, 0, 0, 0));
        assert!(limiter.check_and_consume(&Caller::user("a"), 1.0).await.unwrap().is_allowed());
        assert!(limiter.check_and_consume(&Caller::user("b"), 1.0).await.unwrap().is_allowed());
        assert!(!limiter.check_and_consume(&Caller::user("a"), 1.0).await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn test_global_denial_charges_nothing_else() {
        let (limiter, _) = limiter(RateLimitPolicy::per_hour(10, 0, 0, 1));
        let alice = Caller::user("alice");

        assert!(limiter.check_and_consume(&alice, 1.0).await.unwrap().is_allowed());
        match limiter.check_and_consume(&alice, 1.0).await.unwrap() {
            Decision::Denied { dimension, .. } => assert_eq!(dimension, Dimension::Global),
            other => panic!("expected global denial, got {:?}", other),
        }
        assert_eq!(
            limiter.remaining(&alice, Dimension::User).await.unwrap(),
            Some(9)
        );
    }

    #[tokio::test]
    async fn test_missing_identity_skips_dimension() {
        let (limiter, _) = limiter(RateLimitPolicy::per_hour(1, 0, 0, 0));
        let anon = Caller::anonymous();
        for _ in 0..5 {
            assert!(limiter.check_and_consume(&anon, 1.0).await.unwrap().is_allowed());
        }
    }

    #[tokio::test]
    async fn test_tier_presets() {
        let policy = RateLimitPolicy::default().with_user_tier(Tier::Free);
        let (limiter, _) = limiter(policy);
        let caller = Caller::user("free-user");
        let allowed = {
            let mut n = 0;
            for _ in 0..20 {
                if limiter.check_and_consume(&caller, 1.0).await.unwrap().is_allowed() {
                    n += 1;
                }
            }
            n
        };
        assert_eq!(allowed, 10);
        assert_eq!("PRO".parse::<Tier>().unwrap(), Tier::Pro);
    }
}
