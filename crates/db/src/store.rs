//! The job store and asset sink contracts, plus their PostgreSQL
//! implementation.
//!
//! The dispatcher only ever sees `dyn JobStore` / `dyn AssetSink`, which
//! lets the worker tests run against [`crate::memory::InMemoryStore`].

use std::time::Duration;

use adcraft_core::plans::{validate_quantity, Plan};
use adcraft_core::types::{new_job_id, DbId, JobId};
use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::StoreError;
use crate::models::asset::{Asset, NewAsset};
use crate::models::job::{Enqueued, Job, NewJob};
use crate::models::status::JobStatus;
use crate::repositories::{AssetRepo, JobRepo, QuotaRepo};

/// Error message recorded on jobs recovered by [`JobStore::fail_stale`].
pub const STALE_JOB_MESSAGE: &str = "Job abandoned by worker (claim timed out)";

/// What a [`JobStore::finalize`] call did to the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finalized {
    /// This call moved the job out of `RUNNING`.
    Transitioned,
    /// The job was already terminal (a duplicate finalize, or the stale-job
    /// reaper got there first). Nothing was written.
    AlreadyTerminal(JobStatus),
}

/// Durable job queue with quota-backed enqueue.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Reserve quota and insert a `QUEUED` job as one atomic unit.
    ///
    /// Fails with [`StoreError::QuotaExceeded`] without creating a job, or
    /// with a validation error if `quantity` is outside the user's plan cap.
    async fn enqueue(&self, job: NewJob) -> Result<Enqueued, StoreError>;

    /// Claim the oldest `QUEUED` job, moving it to `RUNNING`.
    ///
    /// An empty queue is reported as [`StoreError::NoJobAvailable`].
    async fn claim(&self) -> Result<Job, StoreError>;

    /// Move a `RUNNING` job to `Succeeded` or `Failed`.
    ///
    /// Finalizing an already-terminal job is a successful no-op, reported
    /// as [`Finalized::AlreadyTerminal`] with the status that stuck.
    async fn finalize(
        &self,
        job_id: JobId,
        status: JobStatus,
        error_message: Option<&str>,
    ) -> Result<Finalized, StoreError>;

    /// Read a job owned by `user_id`. Jobs owned by someone else are
    /// reported as not found.
    async fn get_by_id(&self, job_id: JobId, user_id: DbId) -> Result<Job, StoreError>;

    /// Return reserved quota after a failed job.
    async fn refund_quota(&self, user_id: DbId, quantity: i32) -> Result<(), StoreError>;

    /// Fail `RUNNING` jobs claimed longer than `older_than` ago.
    async fn fail_stale(&self, older_than: Duration) -> Result<u64, StoreError>;
}

/// Append-only sink for generated assets.
#[async_trait]
pub trait AssetSink: Send + Sync {
    async fn persist(&self, asset: NewAsset) -> Result<Asset, StoreError>;

    async fn list_by_job(&self, job_id: JobId) -> Result<Vec<Asset>, StoreError>;
}

/// Decide what a finalize that touched no `RUNNING` row means, given the
/// job's current status.
pub(crate) fn resolve_finalize_miss(
    job_id: JobId,
    current: Option<JobStatus>,
    requested: JobStatus,
) -> Result<Finalized, StoreError> {
    match current {
        None => Err(StoreError::job_not_found(job_id)),
        Some(status) if status.is_terminal() => {
            tracing::debug!(
                job_id = %job_id,
                current = %status,
                requested = %requested,
                "Finalize on terminal job ignored",
            );
            Ok(Finalized::AlreadyTerminal(status))
        }
        Some(status) => Err(StoreError::InvalidTransition {
            job_id,
            from: status.name(),
            to: requested.name(),
        }),
    }
}

/// Reject non-terminal targets before touching storage.
pub(crate) fn ensure_terminal(job_id: JobId, status: JobStatus) -> Result<(), StoreError> {
    if status.is_terminal() {
        Ok(())
    } else {
        Err(StoreError::InvalidTransition {
            job_id,
            from: JobStatus::Running.name(),
            to: status.name(),
        })
    }
}

// ---------------------------------------------------------------------------
// PostgreSQL implementation
// ---------------------------------------------------------------------------

/// [`JobStore`] and [`AssetSink`] backed by PostgreSQL.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl JobStore for PgStore {
    async fn enqueue(&self, job: NewJob) -> Result<Enqueued, StoreError> {
        let mut tx = self.pool.begin().await?;

        let reservation = QuotaRepo::reserve(&mut *tx, job.user_id, job.quantity).await?;
        let plan = Plan::from_name(&reservation.plan)?;
        // Dropping `tx` on this error rolls the reservation back.
        validate_quantity(job.quantity, plan.max_quantity())?;

        let inserted = JobRepo::insert(&mut *tx, new_job_id(), &job).await?;
        tx.commit().await?;

        tracing::info!(
            job_id = %inserted.id,
            user_id = inserted.user_id,
            quantity = inserted.quantity,
            provider = %inserted.provider,
            remaining_quota = reservation.remaining,
            "Job enqueued",
        );

        Ok(Enqueued {
            job: inserted,
            remaining_quota: reservation.remaining,
        })
    }

    async fn claim(&self) -> Result<Job, StoreError> {
        JobRepo::claim_next(&self.pool)
            .await?
            .ok_or(StoreError::NoJobAvailable)
    }

    async fn finalize(
        &self,
        job_id: JobId,
        status: JobStatus,
        error_message: Option<&str>,
    ) -> Result<Finalized, StoreError> {
        ensure_terminal(job_id, status)?;

        if JobRepo::finalize(&self.pool, job_id, status, error_message).await? {
            return Ok(Finalized::Transitioned);
        }

        let current = JobRepo::find_status(&self.pool, job_id)
            .await?
            .and_then(JobStatus::from_id);
        resolve_finalize_miss(job_id, current, status)
    }

    async fn get_by_id(&self, job_id: JobId, user_id: DbId) -> Result<Job, StoreError> {
        JobRepo::find_for_user(&self.pool, job_id, user_id)
            .await?
            .ok_or_else(|| StoreError::job_not_found(job_id))
    }

    async fn refund_quota(&self, user_id: DbId, quantity: i32) -> Result<(), StoreError> {
        QuotaRepo::refund(&self.pool, user_id, quantity).await?;
        Ok(())
    }

    async fn fail_stale(&self, older_than: Duration) -> Result<u64, StoreError> {
        let age = chrono::Duration::from_std(older_than)
            .map_err(|e| adcraft_core::error::CoreError::Internal(e.to_string()))?;
        let cutoff = chrono::Utc::now() - age;
        Ok(JobRepo::fail_stale(&self.pool, cutoff, STALE_JOB_MESSAGE).await?)
    }
}

#[async_trait]
impl AssetSink for PgStore {
    async fn persist(&self, asset: NewAsset) -> Result<Asset, StoreError> {
        Ok(AssetRepo::create(&self.pool, &asset).await?)
    }

    async fn list_by_job(&self, job_id: JobId) -> Result<Vec<Asset>, StoreError> {
        Ok(AssetRepo::list_by_job(&self.pool, job_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn finalize_miss_on_terminal_is_noop() {
        let id = new_job_id();
        assert_eq!(
            resolve_finalize_miss(id, Some(JobStatus::Succeeded), JobStatus::Succeeded).unwrap(),
            Finalized::AlreadyTerminal(JobStatus::Succeeded)
        );
        assert_eq!(
            resolve_finalize_miss(id, Some(JobStatus::Failed), JobStatus::Succeeded).unwrap(),
            Finalized::AlreadyTerminal(JobStatus::Failed)
        );
    }

    #[test]
    fn finalize_miss_on_queued_is_invalid() {
        let id = new_job_id();
        assert_matches!(
            resolve_finalize_miss(id, Some(JobStatus::Queued), JobStatus::Failed),
            Err(StoreError::InvalidTransition { from: "QUEUED", to: "FAILED", .. })
        );
    }

    #[test]
    fn finalize_miss_on_missing_is_not_found() {
        assert_matches!(
            resolve_finalize_miss(new_job_id(), None, JobStatus::Failed),
            Err(StoreError::NotFound { entity: "job", .. })
        );
    }

    #[test]
    fn non_terminal_target_rejected() {
        assert!(ensure_terminal(new_job_id(), JobStatus::Running).is_err());
        assert!(ensure_terminal(new_job_id(), JobStatus::Failed).is_ok());
    }
}
