//! Task store
//!
//! Durable, transactional persistence for task contracts, their transition
//! log and per-step progress.

pub mod connection;
pub mod error;
pub mod models;
pub mod repositories;

pub use connection::{DatabaseConnection, DatabasePool};
pub use error::{DatabaseError, DbResult};
pub use models::{StepRecord, StepStatus, TransitionRecord};
pub use repositories::{StepRepository, TaskRepository, TransitionUpdate};
