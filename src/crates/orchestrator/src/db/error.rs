//! Database error types
//!
//! Converts sqlx errors into a smaller set the engine can reason about.

use thiserror::Error;

use crate::TaskStatus;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Database connection failed: {0}")]
    ConnectionError(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    /// Unique or foreign key violation
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Stored value could not be decoded
    #[error("Data type error: {0}")]
    TypeError(String),

    #[error("Migration failed: {0}")]
    MigrationError(String),

    #[error("Query error: {0}")]
    QueryError(String),

    #[error("Connection pool error: {0}")]
    PoolError(String),

    /// Refused before touching the store; the state machine forbids it
    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },

    /// The database is busy or locked by another writer
    #[error("Database busy: {0}")]
    Busy(String),

    #[error("Database error: {0}")]
    Other(String),
}

impl DatabaseError {
    pub fn not_found(context: impl Into<String>) -> Self {
        DatabaseError::NotFound(context.into())
    }

    pub fn type_error(msg: impl Into<String>) -> Self {
        DatabaseError::TypeError(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DatabaseError::NotFound(_))
    }

    /// Safe to retry for idempotent operations
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DatabaseError::Busy(_) | DatabaseError::PoolError(_) | DatabaseError::ConnectionError(_)
        )
    }
}

/// Result type for database operations
pub type DbResult<T> = std::result::Result<T, DatabaseError>;

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DatabaseError::NotFound("no matching row".to_string()),
            sqlx::Error::ColumnNotFound(col) => {
                DatabaseError::TypeError(format!("column not found: {}", col))
            }
            sqlx::Error::ColumnDecode { index, source } => {
                DatabaseError::TypeError(format!("error decoding column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DatabaseError::TypeError(format!("decode error: {}", source)),
            sqlx::Error::Configuration(msg) => {
                DatabaseError::ConnectionError(format!("configuration error: {}", msg))
            }
            sqlx::Error::Io(err) => DatabaseError::ConnectionError(format!("IO error: {}", err)),
            sqlx::Error::PoolTimedOut => DatabaseError::PoolError("connection pool timed out".to_string()),
            sqlx::Error::PoolClosed => DatabaseError::PoolError("connection pool is closed".to_string()),
            sqlx::Error::Migrate(err) => DatabaseError::MigrationError(err.to_string()),
            sqlx::Error::Database(db_err) => {
                let message = db_err.message().to_string();
                let lower = message.to_lowercase();
                if lower.contains("locked") || lower.contains("busy") {
                    DatabaseError::Busy(message)
                } else if lower.contains("constraint") {
                    DatabaseError::ConstraintViolation(message)
                } else {
                    DatabaseError::QueryError(message)
                }
            }
            err => DatabaseError::Other(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DatabaseError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DatabaseError::MigrationError(err.to_string())
    }
}

impl From<serde_json::Error> for DatabaseError {
    fn from(err: serde_json::Error) -> Self {
        DatabaseError::TypeError(format!("stored JSON is invalid: {}", err))
    }
}
