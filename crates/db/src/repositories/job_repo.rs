//! Repository for the `jobs` table.
//!
//! Uses `JobStatus` from `models::status` for all status transitions.
//! Every transition is guarded in SQL by the status it expects to leave,
//! so concurrent writers can never move a job backwards.

use adcraft_core::types::{DbId, JobId, Timestamp};
use sqlx::{PgConnection, PgPool};

use crate::models::job::{Job, NewJob};
use crate::models::status::{JobStatus, StatusId};

/// Column list for `jobs` queries.
const COLUMNS: &str = "\
    id, user_id, task_type, status_id, provider, quantity, aspect_ratio, \
    prompt, error_message, claimed_at, completed_at, created_at, updated_at";

/// Provides queries for generation jobs.
pub struct JobRepo;

impl JobRepo {
    /// Insert a new `QUEUED` job.
    ///
    /// Takes a connection rather than the pool so it can share the quota
    /// reservation's transaction.
    pub async fn insert(
        conn: &mut PgConnection,
        id: JobId,
        input: &NewJob,
    ) -> Result<Job, sqlx::Error> {
        let query = format!(
            "INSERT INTO jobs (id, user_id, task_type, status_id, provider, quantity, aspect_ratio, prompt) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .bind(input.user_id)
            .bind(input.task_type.name())
            .bind(JobStatus::Queued.id())
            .bind(&input.provider)
            .bind(input.quantity)
            .bind(&input.aspect_ratio)
            .bind(&input.prompt)
            .fetch_one(conn)
            .await
    }

    /// Atomically claim the oldest queued job.
    ///
    /// Uses `SELECT FOR UPDATE SKIP LOCKED` so that concurrent dispatchers
    /// never claim the same row and never wait on a row another
    /// dispatcher is inspecting.
    pub async fn claim_next(pool: &PgPool) -> Result<Option<Job>, sqlx::Error> {
        let query = format!(
            "UPDATE jobs \
             SET status_id = $1, claimed_at = NOW(), updated_at = NOW() \
             WHERE id = ( \
                 SELECT id FROM jobs \
                 WHERE status_id = $2 \
                 ORDER BY created_at ASC, id ASC \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(JobStatus::Running.id())
            .bind(JobStatus::Queued.id())
            .fetch_optional(pool)
            .await
    }

    /// Move a `RUNNING` job to a terminal status.
    ///
    /// Returns `false` when no row was in `RUNNING`, leaving the caller to
    /// decide between "already terminal" and "never claimed".
    pub async fn finalize(
        pool: &PgPool,
        job_id: JobId,
        status: JobStatus,
        error_message: Option<&str>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE jobs \
             SET status_id = $2, error_message = $3, completed_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND status_id = $4",
        )
        .bind(job_id)
        .bind(status.id())
        .bind(error_message)
        .bind(JobStatus::Running.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Current status ID of a job, if it exists.
    pub async fn find_status(pool: &PgPool, job_id: JobId) -> Result<Option<StatusId>, sqlx::Error> {
        sqlx::query_scalar::<_, StatusId>("SELECT status_id FROM jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(pool)
            .await
    }

    /// Fail every `RUNNING` job claimed before `cutoff`.
    ///
    /// Recovers rows left behind by a crashed worker. Returns the number of
    /// jobs failed.
    pub async fn fail_stale(
        pool: &PgPool,
        cutoff: Timestamp,
        message: &str,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE jobs \
             SET status_id = $1, error_message = $2, completed_at = NOW(), updated_at = NOW() \
             WHERE status_id = $3 AND claimed_at < $4",
        )
        .bind(JobStatus::Failed.id())
        .bind(message)
        .bind(JobStatus::Running.id())
        .bind(cutoff)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Find a job by its ID.
    pub async fn find_by_id(pool: &PgPool, id: JobId) -> Result<Option<Job>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1");
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Find a job by ID, restricted to the owning user.
    pub async fn find_for_user(
        pool: &PgPool,
        id: JobId,
        user_id: DbId,
    ) -> Result<Option<Job>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1 AND user_id = $2");
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .bind(user_id)
            .fetch_optional(pool)
            .await
    }
}
