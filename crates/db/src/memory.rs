//! In-process [`JobStore`] / [`AssetSink`] for tests and local dry runs.
//!
//! A single mutex guards all state, so every operation is trivially
//! atomic: reservation plus insert, claim, and finalize behave exactly as
//! the PostgreSQL implementation promises.

use std::collections::HashMap;
use std::time::Duration;

use adcraft_core::plans::{validate_quantity, Plan};
use adcraft_core::types::{new_job_id, DbId, JobId};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::models::asset::{Asset, NewAsset};
use crate::models::job::{Enqueued, Job, NewJob};
use crate::models::status::JobStatus;
use crate::models::user::User;
use crate::store::{
    ensure_terminal, resolve_finalize_miss, AssetSink, Finalized, JobStore, STALE_JOB_MESSAGE,
};

#[derive(Default)]
struct State {
    users: HashMap<DbId, User>,
    /// Jobs keyed by ID, each tagged with its insertion sequence so claims
    /// stay FIFO even when timestamps collide.
    jobs: HashMap<JobId, (u64, Job)>,
    assets: Vec<Asset>,
    next_user_id: DbId,
    next_asset_id: DbId,
    next_seq: u64,
    reject_asset_writes: bool,
}

/// Mutex-guarded in-memory store.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user and return its ID.
    pub async fn add_user(&self, email: &str, plan: Plan, daily_quota_limit: i32) -> DbId {
        let mut state = self.state.lock().await;
        state.next_user_id += 1;
        let id = state.next_user_id;
        let now = Utc::now();
        state.users.insert(
            id,
            User {
                id,
                email: email.to_string(),
                plan: plan.name().to_string(),
                daily_quota_limit,
                quota_used_today: 0,
                created_at: now,
                updated_at: now,
            },
        );
        id
    }

    pub async fn user(&self, id: DbId) -> Option<User> {
        self.state.lock().await.users.get(&id).cloned()
    }

    /// Read a job regardless of owner.
    pub async fn job(&self, id: JobId) -> Option<Job> {
        self.state.lock().await.jobs.get(&id).map(|(_, job)| job.clone())
    }

    /// Make every subsequent [`AssetSink::persist`] call fail.
    pub async fn reject_asset_writes(&self, reject: bool) {
        self.state.lock().await.reject_asset_writes = reject;
    }
}

#[async_trait]
impl JobStore for InMemoryStore {
    async fn enqueue(&self, input: NewJob) -> Result<Enqueued, StoreError> {
        let mut state = self.state.lock().await;

        let user = state
            .users
            .get_mut(&input.user_id)
            .ok_or_else(|| StoreError::user_not_found(input.user_id))?;

        // Same order as the PostgreSQL path: quota first, then the plan cap.
        if user.quota_used_today + input.quantity > user.daily_quota_limit {
            return Err(StoreError::QuotaExceeded {
                remaining: user.remaining_quota(),
            });
        }
        let plan = Plan::from_name(&user.plan)?;
        validate_quantity(input.quantity, plan.max_quantity())?;

        user.quota_used_today += input.quantity;
        user.updated_at = Utc::now();
        let remaining = user.remaining_quota();

        let now = Utc::now();
        let job = Job {
            id: new_job_id(),
            user_id: input.user_id,
            task_type: input.task_type.name().to_string(),
            status_id: JobStatus::Queued.id(),
            provider: input.provider,
            quantity: input.quantity,
            aspect_ratio: input.aspect_ratio,
            prompt: input.prompt,
            error_message: None,
            claimed_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };

        state.next_seq += 1;
        let seq = state.next_seq;
        state.jobs.insert(job.id, (seq, job.clone()));

        Ok(Enqueued {
            job,
            remaining_quota: remaining,
        })
    }

    async fn claim(&self) -> Result<Job, StoreError> {
        let mut state = self.state.lock().await;

        let (_, job) = state
            .jobs
            .values_mut()
            .filter(|(_, job)| job.status_id == JobStatus::Queued.id())
            .min_by_key(|(seq, _)| *seq)
            .ok_or(StoreError::NoJobAvailable)?;

        let now = Utc::now();
        job.status_id = JobStatus::Running.id();
        job.claimed_at = Some(now);
        job.updated_at = now;
        Ok(job.clone())
    }

    async fn finalize(
        &self,
        job_id: JobId,
        status: JobStatus,
        error_message: Option<&str>,
    ) -> Result<Finalized, StoreError> {
        ensure_terminal(job_id, status)?;
        let mut state = self.state.lock().await;

        let current = state.jobs.get(&job_id).map(|(_, job)| job.status());
        match (state.jobs.get_mut(&job_id), current.flatten()) {
            (Some((_, job)), Some(JobStatus::Running)) => {
                let now = Utc::now();
                job.status_id = status.id();
                job.error_message = error_message.map(str::to_string);
                job.completed_at = Some(now);
                job.updated_at = now;
                Ok(Finalized::Transitioned)
            }
            (_, current) => resolve_finalize_miss(job_id, current, status),
        }
    }

    async fn get_by_id(&self, job_id: JobId, user_id: DbId) -> Result<Job, StoreError> {
        let state = self.state.lock().await;
        match state.jobs.get(&job_id) {
            Some((_, job)) if job.user_id == user_id => Ok(job.clone()),
            _ => Err(StoreError::job_not_found(job_id)),
        }
    }

    async fn refund_quota(&self, user_id: DbId, quantity: i32) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if let Some(user) = state.users.get_mut(&user_id) {
            user.quota_used_today = (user.quota_used_today - quantity).max(0);
            user.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn fail_stale(&self, older_than: Duration) -> Result<u64, StoreError> {
        let age = chrono::Duration::from_std(older_than)
            .map_err(|e| adcraft_core::error::CoreError::Internal(e.to_string()))?;
        let cutoff = Utc::now() - age;
        let now = Utc::now();

        let mut state = self.state.lock().await;
        let mut failed = 0;
        for (_, job) in state.jobs.values_mut() {
            let stale = job.status_id == JobStatus::Running.id()
                && job.claimed_at.is_some_and(|claimed| claimed < cutoff);
            if stale {
                job.status_id = JobStatus::Failed.id();
                job.error_message = Some(STALE_JOB_MESSAGE.to_string());
                job.completed_at = Some(now);
                job.updated_at = now;
                failed += 1;
            }
        }
        Ok(failed)
    }
}

#[async_trait]
impl AssetSink for InMemoryStore {
    async fn persist(&self, input: NewAsset) -> Result<Asset, StoreError> {
        let mut state = self.state.lock().await;
        if state.reject_asset_writes {
            return Err(StoreError::Database(sqlx::Error::PoolClosed));
        }

        state.next_asset_id += 1;
        let asset = Asset {
            id: state.next_asset_id,
            user_id: input.user_id,
            job_id: input.job_id,
            kind: input.kind,
            storage_pointer: input.storage_pointer,
            format: input.format,
            width: input.width,
            height: input.height,
            byte_size: input.byte_size,
            provider_metadata: input.provider_metadata,
            created_at: Utc::now(),
        };
        state.assets.push(asset.clone());
        Ok(asset)
    }

    async fn list_by_job(&self, job_id: JobId) -> Result<Vec<Asset>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .assets
            .iter()
            .filter(|asset| asset.job_id == job_id)
            .cloned()
            .collect())
    }
}
