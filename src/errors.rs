use sea_orm::error::{DbErr, SqlErr};
use uuid::Uuid;

/// Error taxonomy for every operation in the core.
///
/// All writes of an operation share one transaction; any error raised inside
/// it aborts the whole transaction, so partial order/stock state is never
/// observable by callers.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Insufficient stock: {0}")]
    InsufficientStock(String),

    #[error("State conflict: {0}")]
    StateConflict(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Concurrent modification of {0}")]
    ConcurrentModification(Uuid),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Event error: {0}")]
    EventError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl ServiceError {
    /// Whether retrying the whole operation is safe and likely to succeed.
    ///
    /// Optimistic-lock conflicts and transient infrastructure failures
    /// (deadlock, lock timeout) qualify; domain errors never do.
    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceError::ConcurrentModification(_) | ServiceError::Timeout(_) => true,
            ServiceError::DatabaseError(err) => is_transient_db_err(err),
            _ => false,
        }
    }
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

/// Deadlocks and lock waits surface differently per backend; match on the
/// driver message since sea-orm does not classify them.
fn is_transient_db_err(err: &DbErr) -> bool {
    let msg = err.to_string().to_lowercase();
    msg.contains("deadlock") || msg.contains("lock timeout") || msg.contains("database is locked")
}

/// Unique-constraint violations drive the order-number retry loop.
pub fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}
