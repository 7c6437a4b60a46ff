//! User rows carrying the daily quota ledger.

use adcraft_core::error::CoreError;
use adcraft_core::plans::Plan;
use adcraft_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `users` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct User {
    pub id: DbId,
    pub email: String,
    pub plan: String,
    pub daily_quota_limit: i32,
    pub quota_used_today: i32,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl User {
    pub fn plan(&self) -> Result<Plan, CoreError> {
        Plan::from_name(&self.plan)
    }

    /// Quota still available today. Never negative.
    pub fn remaining_quota(&self) -> i32 {
        (self.daily_quota_limit - self.quota_used_today).max(0)
    }
}

/// DTO for creating a user.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateUser {
    pub email: String,
    pub plan: String,
    /// Overrides the plan's default daily quota when set.
    pub daily_quota_limit: Option<i32>,
}
