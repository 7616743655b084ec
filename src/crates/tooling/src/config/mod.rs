//! Configuration management utilities
//!
//! - `ConfigBuilder` trait: environment overrides layered over file values,
//!   validated last
//! - Environment variable helpers with typed parsing
//!
//! # Example
//!
//! ```rust,ignore
//! use tooling::config::{ConfigBuilder, override_bool, override_parse};
//!
//! impl ConfigBuilder for CacheConfig {
//!     fn apply_env(&mut self, prefix: &str) -> tooling::Result<()> {
//!         override_parse(&mut self.ttl_secs, prefix, "ttl_secs")?;
//!         override_bool(&mut self.enabled, prefix, "enabled")
//!     }
//! }
//!
//! let config = file_config.cache.layered("APP_")?;
//! ```

mod builder;
mod env;

pub use builder::ConfigBuilder;
pub use env::{build_env_key, get_env, get_env_bool, get_env_parse, override_bool, override_parse};
