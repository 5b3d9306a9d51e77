//! Store-level errors that carry domain meaning beyond `sqlx::Error`.

use hazrisk_core::types::DbId;

/// Failure creating or linking a calculation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The calculation would violate a linkage constraint.
    #[error("Invalid parameters: {0}")]
    Parameter(String),

    #[error("Storage error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Failure deleting a calculation. Nothing is removed in any of these cases.
#[derive(Debug, thiserror::Error)]
pub enum DeleteError {
    #[error("Calculation {0} not found")]
    NotFound(DbId),

    /// A risk calculation still consumes this calculation or its outputs.
    #[error("Calculation {id} is referenced by risk calculation(s) {referenced_by:?}")]
    Referenced { id: DbId, referenced_by: Vec<DbId> },

    /// One of its jobs is still running and would lose its rows mid-run.
    #[error("Calculation {id} has a running job ({job_id}); wait for it to finish")]
    Running { id: DbId, job_id: DbId },

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),
}
