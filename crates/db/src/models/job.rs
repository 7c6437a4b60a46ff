//! Generation job rows and DTOs.

use adcraft_core::error::CoreError;
use adcraft_core::generation::TaskType;
use adcraft_core::types::{DbId, JobId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::status::{JobStatus, StatusId};

/// A row from the `jobs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Job {
    pub id: JobId,
    pub user_id: DbId,
    pub task_type: String,
    pub status_id: StatusId,
    pub provider: String,
    pub quantity: i32,
    pub aspect_ratio: String,
    pub prompt: serde_json::Value,
    pub error_message: Option<String>,
    pub claimed_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Job {
    /// Decoded status. `None` only if the row holds an unknown status ID.
    pub fn status(&self) -> Option<JobStatus> {
        JobStatus::from_id(self.status_id)
    }

    /// Decoded task type.
    pub fn task_type(&self) -> Result<TaskType, CoreError> {
        TaskType::from_name(&self.task_type)
    }
}

/// Input for inserting a new job. The ID is generated by the store.
#[derive(Debug, Clone, Deserialize)]
pub struct NewJob {
    pub user_id: DbId,
    pub task_type: TaskType,
    pub provider: String,
    pub quantity: i32,
    pub aspect_ratio: String,
    pub prompt: serde_json::Value,
}

/// Result of a successful enqueue: the inserted job and the quota left.
#[derive(Debug, Clone, Serialize)]
pub struct Enqueued {
    pub job: Job,
    pub remaining_quota: i32,
}
