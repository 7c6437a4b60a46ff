use adcraft_core::error::CoreError;
use adcraft_core::types::{DbId, JobId};

/// Errors surfaced by the job store, quota ledger and asset sink.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The reservation would push `quota_used_today` past the daily limit.
    /// Nothing was written.
    #[error("Daily quota exceeded: {remaining} generation(s) remaining today")]
    QuotaExceeded { remaining: i32 },

    /// The queue is empty. A normal poll outcome, not a failure.
    #[error("No queued job available")]
    NoJobAvailable,

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The requested status change would violate
    /// `QUEUED -> RUNNING -> {SUCCEEDED, FAILED}`.
    #[error("Invalid status transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: JobId,
        from: &'static str,
        to: &'static str,
    },

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    pub fn job_not_found(id: JobId) -> Self {
        Self::NotFound {
            entity: "job",
            id: id.to_string(),
        }
    }

    pub fn user_not_found(id: DbId) -> Self {
        Self::NotFound {
            entity: "user",
            id: id.to_string(),
        }
    }
}
