//! Repository pattern implementations for database access

pub mod step_repo;
pub mod task_repo;

pub use step_repo::StepRepository;
pub use task_repo::{TaskRepository, TransitionUpdate};
