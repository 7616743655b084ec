//! PII detection and redaction

pub mod detector;
pub mod patterns;
pub mod redactor;
pub mod types;
pub mod validator;

pub use detector::PiiDetector;
pub use patterns::CATALOG_VERSION;
pub use redactor::{mask_value, redact, RedactionStrategy};
pub use types::{PatternSet, PiiConfig, PiiFinding, PiiScan, PiiType};
