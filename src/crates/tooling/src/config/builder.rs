//! Configuration builder trait
//!
//! Configuration structures in the workspace are layered the same way:
//! defaults, then a file, then environment overrides, then validation.
//! This trait captures the last two steps so every section of a config file
//! behaves identically.

use crate::Result;

/// Trait for configuration sections that accept environment overrides
///
/// # Example
///
/// ```rust,ignore
/// use tooling::config::{ConfigBuilder, get_env_parse, build_env_key};
///
/// #[derive(Clone, Default)]
/// struct HttpConfig {
///     pub port: u16,
/// }
///
/// impl ConfigBuilder for HttpConfig {
///     fn validate(&self) -> tooling::Result<()> {
///         if self.port == 0 {
///             return Err(tooling::ToolingError::General("port must be non-zero".into()));
///         }
///         Ok(())
///     }
///
///     fn apply_env(&mut self, prefix: &str) -> tooling::Result<()> {
///         if let Some(port) = get_env_parse(&build_env_key(prefix, "port"))? {
///             self.port = port;
///         }
///         Ok(())
///     }
/// }
///
/// let config = HttpConfig { port: 8080 }.layered("APP_")?;
/// ```
pub trait ConfigBuilder: Default + Clone {
    /// Validate the configuration
    ///
    /// Returns an error if a value is out of range or two values contradict
    /// each other.
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Overwrite fields from `{PREFIX}{FIELD_NAME}` environment variables
    ///
    /// Variables that are not set leave the field untouched.
    fn apply_env(&mut self, prefix: &str) -> Result<()>;

    /// Apply environment overrides on top of `self`, then validate
    fn layered(mut self, prefix: &str) -> Result<Self> {
        self.apply_env(prefix)?;
        self.validate()?;
        Ok(self)
    }

    /// Defaults plus environment overrides, validated
    fn from_env_with_defaults(prefix: &str) -> Result<Self> {
        Self::default().layered(prefix)
    }
}
