//! Service configuration
//!
//! One TOML file with `[server]`, `[database]`, `[reflex]`, `[resilience]`,
//! `[logging]` and `[arms]` sections. Every field has a default, so an empty
//! or missing file is valid. `ORCHESTRATOR_*` environment variables are
//! applied after the file and the result is validated last.

pub mod loader;

pub use loader::{deep_merge, load_yaml_config, load_yaml_file};

use reflex::ReflexConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tooling::async_utils::RetryPolicy;
use tooling::config::{build_env_key, get_env, override_parse, ConfigBuilder};
use tooling::logging::LogFormat;
use tooling::ToolingError;

use crate::client::BreakerConfig;
use crate::router::{ArmCapability, ArmRegistry};
use crate::{OrchestratorError, Result};

pub use reflex::config::ENV_PREFIX;

/// Env variable naming the config file
pub const CONFIG_PATH_ENV: &str = "CONFIG_PATH";

const DEFAULT_LOCATIONS: [&str; 2] = ["config/orchestrator.toml", "orchestrator.toml"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub name: String,
    pub bind: String,
    /// Listen address of the standalone reflex service
    pub reflex_bind: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            name: "orchestrator-server".to_string(),
            bind: "0.0.0.0:8080".to_string(),
            reflex_bind: "0.0.0.0:8081".to_string(),
        }
    }
}

impl ConfigBuilder for ServerSection {
    fn validate(&self) -> tooling::Result<()> {
        for (name, addr) in [("bind", &self.bind), ("reflex_bind", &self.reflex_bind)] {
            addr.parse::<std::net::SocketAddr>()
                .map_err(|e| ToolingError::General(format!("server.{} '{}': {}", name, addr, e)))?;
        }
        Ok(())
    }

    fn apply_env(&mut self, prefix: &str) -> tooling::Result<()> {
        override_parse(&mut self.bind, prefix, "bind")?;
        override_parse(&mut self.reflex_bind, prefix, "reflex_bind")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url: "sqlite://orchestrator.db".to_string(),
            max_connections: 5,
        }
    }
}

impl ConfigBuilder for DatabaseSection {
    fn validate(&self) -> tooling::Result<()> {
        if !self.url.starts_with("sqlite:") {
            return Err(ToolingError::General(format!(
                "database.url must be a sqlite: URL, got '{}'",
                self.url
            )));
        }
        if self.max_connections == 0 {
            return Err(ToolingError::General("database.max_connections must be at least 1".into()));
        }
        Ok(())
    }

    fn apply_env(&mut self, prefix: &str) -> tooling::Result<()> {
        override_parse(&mut self.url, prefix, "database_url")?;
        override_parse(&mut self.max_connections, prefix, "database_max_connections")
    }
}

/// Circuit breaker and retry settings for every outbound call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceSection {
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_cooldown_seconds: u64,
    /// Attempts including the first
    pub retry_max_attempts: usize,
    pub retry_initial_backoff_ms: u64,
    pub retry_max_backoff_ms: u64,
    pub retry_max_total_wait_ms: u64,
    /// Per-request HTTP timeout
    pub request_timeout_ms: u64,
}

impl Default for ResilienceSection {
    fn default() -> Self {
        Self {
            circuit_breaker_threshold: 5,
            circuit_breaker_cooldown_seconds: 60,
            retry_max_attempts: 3,
            retry_initial_backoff_ms: 100,
            retry_max_backoff_ms: 2_000,
            retry_max_total_wait_ms: 5_000,
            request_timeout_ms: 30_000,
        }
    }
}

impl ResilienceSection {
    pub fn breaker_config(&self) -> BreakerConfig {
        BreakerConfig {
            threshold: self.circuit_breaker_threshold,
            cooldown: Duration::from_secs(self.circuit_breaker_cooldown_seconds),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_max_attempts)
            .with_initial_interval(Duration::from_millis(self.retry_initial_backoff_ms))
            .with_max_interval(Duration::from_millis(self.retry_max_backoff_ms))
            .with_max_total_wait(Duration::from_millis(self.retry_max_total_wait_ms))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl ConfigBuilder for ResilienceSection {
    fn validate(&self) -> tooling::Result<()> {
        if self.circuit_breaker_threshold == 0 {
            return Err(ToolingError::General("circuit_breaker_threshold must be at least 1".into()));
        }
        if self.circuit_breaker_cooldown_seconds == 0 {
            return Err(ToolingError::General(
                "circuit_breaker_cooldown_seconds must be at least 1".into(),
            ));
        }
        if self.retry_max_attempts == 0 {
            return Err(ToolingError::General("retry_max_attempts must be at least 1".into()));
        }
        if self.retry_initial_backoff_ms > self.retry_max_backoff_ms {
            return Err(ToolingError::General(
                "retry_initial_backoff_ms must not exceed retry_max_backoff_ms".into(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(ToolingError::General("request_timeout_ms must be greater than 0".into()));
        }
        Ok(())
    }

    fn apply_env(&mut self, prefix: &str) -> tooling::Result<()> {
        override_parse(&mut self.circuit_breaker_threshold, prefix, "circuit_breaker_threshold")?;
        override_parse(
            &mut self.circuit_breaker_cooldown_seconds,
            prefix,
            "circuit_breaker_cooldown_seconds",
        )?;
        override_parse(&mut self.retry_max_attempts, prefix, "retry_max_attempts")?;
        override_parse(&mut self.retry_initial_backoff_ms, prefix, "retry_initial_backoff_ms")?;
        override_parse(&mut self.retry_max_backoff_ms, prefix, "retry_max_backoff_ms")?;
        override_parse(&mut self.retry_max_total_wait_ms, prefix, "retry_max_total_wait_ms")?;
        override_parse(&mut self.request_timeout_ms, prefix, "request_timeout_ms")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub format: LogFormat,
    /// Default filter directive; `RUST_LOG` wins when set
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            format: LogFormat::Compact,
            level: "info".to_string(),
        }
    }
}

impl ConfigBuilder for LoggingSection {
    fn apply_env(&mut self, prefix: &str) -> tooling::Result<()> {
        override_parse(&mut self.format, prefix, "log_format")?;
        override_parse(&mut self.level, prefix, "log_level")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArmsSection {
    /// YAML registry file, see [`crate::router::RegistryFile`]
    pub registry_path: Option<PathBuf>,

    /// Arms declared inline as `[[arms.static]]`
    #[serde(rename = "static")]
    pub static_arms: Vec<ArmCapability>,

    /// Seconds between `/capabilities` probes; 0 disables probing
    pub refresh_interval_seconds: u64,
}

impl ArmsSection {
    /// Registry built from the YAML file followed by the inline entries
    pub fn build_registry(&self) -> Result<ArmRegistry> {
        let mut arms = match &self.registry_path {
            Some(path) => ArmRegistry::from_yaml_file(path)?.snapshot().to_vec(),
            None => Vec::new(),
        };
        arms.extend(self.static_arms.iter().cloned());
        ArmRegistry::new(arms)
    }
}

impl ConfigBuilder for ArmsSection {
    fn apply_env(&mut self, prefix: &str) -> tooling::Result<()> {
        if let Some(path) = get_env(&build_env_key(prefix, "arm_registry_path"))? {
            self.registry_path = (!path.trim().is_empty()).then(|| PathBuf::from(path));
        }
        override_parse(&mut self.refresh_interval_seconds, prefix, "arm_refresh_interval_seconds")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub server: ServerSection,
    pub database: DatabaseSection,
    pub reflex: ReflexConfig,
    pub resilience: ResilienceSection,
    pub logging: LoggingSection,
    pub arms: ArmsSection,
}

impl ConfigBuilder for OrchestratorConfig {
    fn validate(&self) -> tooling::Result<()> {
        self.server.validate()?;
        self.database.validate()?;
        self.reflex.validate()?;
        self.resilience.validate()?;
        self.logging.validate()?;
        self.arms.validate()
    }

    fn apply_env(&mut self, prefix: &str) -> tooling::Result<()> {
        self.server.apply_env(prefix)?;
        self.database.apply_env(prefix)?;
        self.reflex.apply_env(prefix)?;
        self.resilience.apply_env(prefix)?;
        self.logging.apply_env(prefix)?;
        self.arms.apply_env(prefix)
    }
}

impl OrchestratorConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| OrchestratorError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| OrchestratorError::Config(e.to_string()))
    }

    /// File, then environment overrides, then validation
    ///
    /// `explicit` (a `--config` flag) wins over `CONFIG_PATH`; both must
    /// exist. Without either, the default locations are tried and defaults
    /// are used when none exists.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let from_env = get_env(CONFIG_PATH_ENV).map_err(config_error)?.map(PathBuf::from);
        let file = match explicit.map(Path::to_path_buf).or(from_env) {
            Some(path) => Some(path),
            None => DEFAULT_LOCATIONS
                .iter()
                .map(PathBuf::from)
                .find(|p| p.exists()),
        };

        let base = match &file {
            Some(path) => {
                tracing::info!(path = %path.display(), "Loading configuration");
                Self::from_file(path)?
            }
            None => {
                tracing::info!("No configuration file found, using defaults");
                Self::default()
            }
        };

        base.layered(ENV_PREFIX).map_err(config_error)
    }
}

fn config_error(err: ToolingError) -> OrchestratorError {
    OrchestratorError::Config(err.to_string())
}
