//! API request handlers, one module per resource

pub mod health;
pub mod preprocess;
pub mod tasks;

pub use health::{health, metrics};
pub use preprocess::preprocess;
pub use tasks::{cancel_task, create_task, get_task, list_tasks};
