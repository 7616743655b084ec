//! Reflex tier configuration
//!
//! Deserialized from the `[reflex]` section of the service config file,
//! then overridden from `ORCHESTRATOR_*` environment variables.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tooling::config::{get_env, build_env_key, override_bool, override_parse, ConfigBuilder};
use tooling::ToolingError;

use crate::injection::{self, DetectionMode};
use crate::pii::{self, PatternSet};
use crate::ratelimit::{RateLimitPolicy, Tier};
use crate::Severity;

pub const ENV_PREFIX: &str = "ORCHESTRATOR_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReflexConfig {
    /// Seconds a safe verdict stays cached
    pub cache_ttl_safe: u64,

    /// Seconds an unsafe verdict stays cached
    pub cache_ttl_unsafe: u64,

    /// Requests per hour per caller identity; 0 disables
    pub rate_limit_per_user: u64,
    pub rate_limit_per_ip: u64,
    pub rate_limit_per_endpoint: u64,
    pub rate_limit_global: u64,

    /// Subscription preset replacing `rate_limit_per_user`
    pub user_tier: Option<Tier>,

    /// Take the client address from `X-Forwarded-For`. Only safe behind a
    /// proxy that overwrites the header.
    pub trust_forwarded_for: bool,

    pub pipeline_deadline_ms: u64,

    /// Keep serving (detectors only) when the shared store is down
    pub fail_open: bool,

    pub max_input_chars: usize,

    /// Longest wait on a concurrent computation of the same input
    pub coalesce_wait_ms: u64,

    pub pii_pattern_set: PatternSet,
    pub injection_mode: DetectionMode,

    /// Injection findings at or above this make a request unsafe
    pub block_severity: Severity,

    /// `memory` or a `sqlite:` URL
    pub store_url: String,

    /// Call a remote reflex service instead of running in-process
    pub remote_url: Option<String>,

    /// Seconds between sweeps of expired entries and idle buckets; 0 disables
    pub purge_interval_seconds: u64,
}

impl Default for ReflexConfig {
    fn default() -> Self {
        Self {
            cache_ttl_safe: 3600,
            cache_ttl_unsafe: 60,
            rate_limit_per_user: 1000,
            rate_limit_per_ip: 5000,
            rate_limit_per_endpoint: 0,
            rate_limit_global: 0,
            user_tier: None,
            trust_forwarded_for: false,
            pipeline_deadline_ms: 10,
            fail_open: true,
            max_input_chars: 10_000,
            coalesce_wait_ms: 5,
            pii_pattern_set: PatternSet::Standard,
            injection_mode: DetectionMode::Standard,
            block_severity: Severity::High,
            store_url: "memory".to_string(),
            remote_url: None,
            purge_interval_seconds: 60,
        }
    }
}

impl ReflexConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.pipeline_deadline_ms)
    }

    pub fn coalesce_wait(&self) -> Duration {
        Duration::from_millis(self.coalesce_wait_ms)
    }

    pub fn purge_interval(&self) -> Option<Duration> {
        (self.purge_interval_seconds > 0).then(|| Duration::from_secs(self.purge_interval_seconds))
    }

    pub fn rate_limit_policy(&self) -> RateLimitPolicy {
        let policy = RateLimitPolicy::per_hour(
            self.rate_limit_per_user,
            self.rate_limit_per_ip,
            self.rate_limit_per_endpoint,
            self.rate_limit_global,
        );
        match self.user_tier {
            Some(tier) => policy.with_user_tier(tier),
            None => policy,
        }
    }

    /// Tag mixed into every cache key
    ///
    /// Changes whenever a catalog or an option that affects verdicts
    /// changes, so old entries are never served after an upgrade.
    pub fn version_tag(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}",
            pii::CATALOG_VERSION,
            injection::CATALOG_VERSION,
            self.pii_pattern_set.as_str(),
            self.injection_mode.as_str(),
            self.block_severity,
            self.max_input_chars
        )
    }
}

impl ConfigBuilder for ReflexConfig {
    fn validate(&self) -> tooling::Result<()> {
        if self.pipeline_deadline_ms == 0 {
            return Err(ToolingError::General(
                "pipeline_deadline_ms must be greater than 0".into(),
            ));
        }
        if self.cache_ttl_safe == 0 || self.cache_ttl_unsafe == 0 {
            return Err(ToolingError::General("cache TTLs must be greater than 0".into()));
        }
        if self.cache_ttl_unsafe > self.cache_ttl_safe {
            return Err(ToolingError::General(
                "cache_ttl_unsafe must not exceed cache_ttl_safe".into(),
            ));
        }
        if self.max_input_chars == 0 {
            return Err(ToolingError::General("max_input_chars must be greater than 0".into()));
        }
        Ok(())
    }

    fn apply_env(&mut self, prefix: &str) -> tooling::Result<()> {
        override_parse(&mut self.cache_ttl_safe, prefix, "cache_ttl_safe")?;
        override_parse(&mut self.cache_ttl_unsafe, prefix, "cache_ttl_unsafe")?;
        override_parse(&mut self.rate_limit_per_user, prefix, "rate_limit_per_user")?;
        override_parse(&mut self.rate_limit_per_ip, prefix, "rate_limit_per_ip")?;
        override_parse(&mut self.rate_limit_per_endpoint, prefix, "rate_limit_per_endpoint")?;
        override_parse(&mut self.rate_limit_global, prefix, "rate_limit_global")?;
        if let Some(tier) = get_env(&build_env_key(prefix, "user_tier"))? {
            self.user_tier = match tier.trim() {
                "" => None,
                name => Some(name.parse().map_err(ToolingError::General)?),
            };
        }
        override_bool(&mut self.trust_forwarded_for, prefix, "trust_forwarded_for")?;
        override_parse(&mut self.pipeline_deadline_ms, prefix, "pipeline_deadline_ms")?;
        override_bool(&mut self.fail_open, prefix, "fail_open")?;
        override_parse(&mut self.max_input_chars, prefix, "max_input_chars")?;
        override_parse(&mut self.coalesce_wait_ms, prefix, "coalesce_wait_ms")?;
        override_parse(&mut self.pii_pattern_set, prefix, "pii_pattern_set")?;
        override_parse(&mut self.injection_mode, prefix, "injection_mode")?;
        override_parse(&mut self.block_severity, prefix, "block_severity")?;
        override_parse(&mut self.store_url, prefix, "store_url")?;
        if let Some(url) = get_env(&build_env_key(prefix, "remote_url"))? {
            self.remote_url = (!url.trim().is_empty()).then_some(url);
        }
        override_parse(&mut self.purge_interval_seconds, prefix, "purge_interval_seconds")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = ReflexConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.deadline(), Duration::from_millis(10));
        assert!(config.fail_open);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: ReflexConfig = serde_json::from_str(r#"{"fail_open": false, "block_severity": "critical"}"#).unwrap();
        assert!(!config.fail_open);
        assert_eq!(config.block_severity, Severity::Critical);
        assert_eq!(config.cache_ttl_safe, 3600);
    }

    #[test]
    fn test_version_tag_tracks_options() {
        let base = ReflexConfig::default();
        let relaxed = ReflexConfig {
            pii_pattern_set: PatternSet::Relaxed,
            ..base.clone()
        };
        assert_ne!(base.version_tag(), relaxed.version_tag());
        assert_eq!(base.version_tag(), ReflexConfig::default().version_tag());

        // TTLs do not change verdicts
        let longer = ReflexConfig {
            cache_ttl_safe: 7200,
            ..base.clone()
        };
        assert_eq!(base.version_tag(), longer.version_tag());
    }

    #[test]
    fn test_unsafe_ttl_longer_than_safe_is_rejected() {
        let config = ReflexConfig {
            cache_ttl_unsafe: 7200,
            ..ReflexConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_override() {
        std::env::set_var("REFLEXCFGTEST_FAIL_OPEN", "false");
        std::env::set_var("REFLEXCFGTEST_RATE_LIMIT_PER_USER", "100");
        let config = ReflexConfig::default().layered("REFLEXCFGTEST_").unwrap();
        std::env::remove_var("REFLEXCFGTEST_FAIL_OPEN");
        std::env::remove_var("REFLEXCFGTEST_RATE_LIMIT_PER_USER");

        assert!(!config.fail_open);
        assert_eq!(config.rate_limit_per_user, 100);
    }

    #[test]
    fn test_user_tier_replaces_per_user_limit() {
        let config: ReflexConfig = serde_json::from_str(r#"{"user_tier": "pro"}"#).unwrap();
        assert_eq!(config.user_tier, Some(Tier::Pro));
        let policy = config.rate_limit_policy();
        assert_eq!(policy.user, Some(Tier::Pro.bucket()));
        assert_eq!(policy.ip, ReflexConfig::default().rate_limit_policy().ip);

        let untiered = ReflexConfig::default().rate_limit_policy();
        assert_eq!(untiered.user, Some(tooling::rate_limit::BucketConfig::per_hour(1000)));
    }

    #[test]
    fn test_user_tier_from_env() {
        std::env::set_var("REFLEXTIERTEST_USER_TIER", "Enterprise");
        let config = ReflexConfig::default().layered("REFLEXTIERTEST_").unwrap();
        assert_eq!(config.user_tier, Some(Tier::Enterprise));

        std::env::set_var("REFLEXTIERTEST_USER_TIER", "platinum");
        assert!(ReflexConfig::default().layered("REFLEXTIERTEST_").is_err());
        std::env::remove_var("REFLEXTIERTEST_USER_TIER");
    }

    #[test]
    fn test_forwarded_for_and_purge_defaults() {
        let config = ReflexConfig::default();
        assert!(!config.trust_forwarded_for);
        assert_eq!(config.purge_interval(), Some(Duration::from_secs(60)));

        let disabled = ReflexConfig {
            purge_interval_seconds: 0,
            ..config
        };
        assert_eq!(disabled.purge_interval(), None);
    }
}
