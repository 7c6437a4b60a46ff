//! Generated asset rows. Assets are append-only.

use adcraft_core::types::{DbId, JobId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `assets` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Asset {
    pub id: DbId,
    pub user_id: DbId,
    pub job_id: JobId,
    pub kind: String,
    pub storage_pointer: String,
    pub format: String,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub byte_size: Option<i64>,
    pub provider_metadata: serde_json::Value,
    pub created_at: Timestamp,
}

/// Input for persisting one generated asset.
#[derive(Debug, Clone, Deserialize)]
pub struct NewAsset {
    pub user_id: DbId,
    pub job_id: JobId,
    pub kind: String,
    pub storage_pointer: String,
    pub format: String,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub byte_size: Option<i64>,
    pub provider_metadata: serde_json::Value,
}
