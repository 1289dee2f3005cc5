use thiserror::Error;

/// Errors raised by [`JobStore`](super::JobStore) implementations
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database constraint violation: {constraint}")]
    ConstraintViolation { constraint: String },

    #[error("Invalid value in column {column}: {reason}")]
    InvalidRow { column: String, reason: String },
}

pub type PersistenceResult<T> = Result<T, PersistenceError>;

pub fn constraint_violation(constraint: impl Into<String>) -> PersistenceError {
    PersistenceError::ConstraintViolation {
        constraint: constraint.into(),
    }
}

pub fn invalid_row(column: impl Into<String>, reason: impl ToString) -> PersistenceError {
    PersistenceError::InvalidRow {
        column: column.into(),
        reason: reason.to_string(),
    }
}
