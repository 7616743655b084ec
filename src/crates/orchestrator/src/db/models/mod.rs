//! Database rows
//!
//! Timestamps are stored as RFC 3339 strings and structured fields as JSON
//! text, since SQLite has no native type for either.

pub mod step;
pub mod task;
pub mod transition;

pub use step::{StepRecord, StepStatus};
pub use task::TaskRow;
pub use transition::TransitionRecord;
