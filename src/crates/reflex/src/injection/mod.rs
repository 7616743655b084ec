//! Prompt and command injection detection
//!
//! Matches are scored against a fixed heuristic catalog, then lowered when
//! the surrounding text frames them as discussion (quotes, negation,
//! research or test framing).

pub mod analyzer;
pub mod detector;
pub mod patterns;
pub mod types;

pub use detector::{risk_score, InjectionDetector};
pub use patterns::CATALOG_VERSION;
pub use types::{
    ContextFlags, DetectionMode, InjectionCategory, InjectionConfig, InjectionFinding,
    InjectionKind, InjectionScan, Span,
};
