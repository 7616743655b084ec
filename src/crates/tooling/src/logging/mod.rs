//! Logging utilities
//!
//! Subscriber setup plus small helpers for structured logging with tracing.
//!
//! Three output formats are supported:
//!
//! - `json` - one JSON object per line, for log aggregation
//! - `pretty` - multi-line, coloured, for development
//! - `compact` - single-line, coloured, for terminals
//!
//! `RUST_LOG` always wins over the configured level.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::{Result, ToolingError};

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
    #[default]
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = ToolingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            other => Err(ToolingError::General(format!("unknown log format: {}", other))),
        }
    }
}

/// Install the global tracing subscriber
///
/// `default_level` is an `EnvFilter` directive such as `"info"` or
/// `"orchestrator=debug,sqlx=warn"`. Fails if a subscriber is already set.
pub fn init_logging(format: LogFormat, default_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| ToolingError::General(format!("invalid log filter: {}", e)))?
        .add_directive(quiet("hyper=warn")?)
        .add_directive(quiet("sqlx=warn")?);

    let registry = tracing_subscriber::registry().with(filter);

    let installed = match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(false))
            .try_init(),
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init(),
        LogFormat::Compact => registry
            .with(fmt::layer().compact().with_target(false))
            .try_init(),
    };

    installed.map_err(|e| ToolingError::General(format!("logging already initialized: {}", e)))
}

fn quiet(directive: &str) -> Result<tracing_subscriber::filter::Directive> {
    directive
        .parse()
        .map_err(|e| ToolingError::General(format!("invalid log directive {}: {}", directive, e)))
}

/// Log execution time of a future at debug level
///
/// ```rust,ignore
/// let tasks = timed("recover_tasks", engine.recover()).await?;
/// ```
pub async fn timed<F, T>(name: &str, future: F) -> T
where
    F: std::future::Future<Output = T>,
{
    let start = Instant::now();
    debug!("Starting: {}", name);

    let result = future.await;

    debug!("Completed: {} in {}", name, format_duration(start.elapsed()));
    result
}

/// Format duration in human-readable form
///
/// ```rust
/// use tooling::logging::format_duration;
/// use std::time::Duration;
///
/// assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
/// assert_eq!(format_duration(Duration::from_millis(500)), "500ms");
/// assert_eq!(format_duration(Duration::from_micros(500)), "500μs");
/// ```
pub fn format_duration(duration: std::time::Duration) -> String {
    let micros = duration.as_micros();

    if micros < 1000 {
        format!("{}μs", micros)
    } else if micros < 1_000_000 {
        format!("{}ms", micros / 1000)
    } else if micros < 60_000_000 {
        format!("{:.2}s", micros as f64 / 1_000_000.0)
    } else {
        let seconds = micros / 1_000_000;
        format!("{}m{}s", seconds / 60, seconds % 60)
    }
}

static SECRET_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"(?i)(api[\s_-]?key|apikey)\s*[:=]\s*\S+", "$1: [REDACTED]"),
        (r"(?i)(password|passwd|pwd)\s*[:=]\s*\S+", "$1: [REDACTED]"),
        (r"(?i)(token)\s*[:=]\s*\S+", "$1: [REDACTED]"),
        (r"(?i)(secret)\s*[:=]\s*\S+", "$1: [REDACTED]"),
        (r"(?i)(authorization|auth)\s*:\s*bearer\s+\S+", "$1: Bearer [REDACTED]"),
        (r"\b\d{3}-\d{2}-\d{4}\b", "[REDACTED-SSN]"),
    ]
    .into_iter()
    .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, replacement)))
    .collect()
});

/// Strip credentials and SSN-shaped values from text bound for a log line
///
/// ```rust
/// use tooling::logging::sanitize_for_logging;
///
/// let sanitized = sanitize_for_logging("API key: sk-abc123");
/// assert!(sanitized.contains("[REDACTED]"));
/// ```
pub fn sanitize_for_logging(input: &str) -> String {
    SECRET_PATTERNS
        .iter()
        .fold(input.to_string(), |acc, (re, replacement)| {
            re.replace_all(&acc, *replacement).into_owned()
        })
}

/// Truncate a string for logging at a char boundary, appending `...`
pub fn truncate_for_logging(input: &str, max_chars: usize) -> String {
    match input.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &input[..idx]),
        None => input.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_micros(500)), "500μs");
        assert_eq!(format_duration(Duration::from_millis(500)), "500ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m5s");
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_sanitize_credentials() {
        for input in [
            "API key: sk-abc123",
            "password: secret123",
            "token=xyz789",
            "Authorization: Bearer abc123xyz",
        ] {
            let sanitized = sanitize_for_logging(input);
            assert!(sanitized.contains("[REDACTED]"), "not redacted: {}", input);
        }
    }

    #[test]
    fn test_sanitize_ssn() {
        let sanitized = sanitize_for_logging("arm echoed 123-45-6789 back");
        assert!(!sanitized.contains("123-45-6789"));
    }

    #[test]
    fn test_sanitize_preserves_safe_data() {
        let input = "Status: active, attempts: 3";
        assert_eq!(sanitize_for_logging(input), input);
    }

    #[test]
    fn test_truncate_for_logging() {
        assert_eq!(truncate_for_logging("abcdef", 3), "abc...");
        assert_eq!(truncate_for_logging("abc", 3), "abc");
        assert_eq!(truncate_for_logging("héllo", 2), "hé...");
    }

    #[tokio::test]
    async fn test_timed() {
        let result = timed("test_operation", async { 42 }).await;
        assert_eq!(result, 42);
    }
}
