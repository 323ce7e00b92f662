//! Error kinds surfaced by the Job Store and its consumers (spec §7).

use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("job {0} not found")]
    NotFound(Uuid),

    #[error("container_ref {0:?} already claimed by another job")]
    Conflict(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
