//! Repository for the `users` table.

use adcraft_core::plans::Plan;
use adcraft_core::types::DbId;
use sqlx::PgPool;

use crate::error::StoreError;
use crate::models::user::{CreateUser, User};

/// Column list for `users` queries.
const COLUMNS: &str =
    "id, email, plan, daily_quota_limit, quota_used_today, created_at, updated_at";

pub struct UserRepo;

impl UserRepo {
    /// Create a user. The daily limit defaults to the plan's allowance.
    pub async fn create(pool: &PgPool, input: &CreateUser) -> Result<User, StoreError> {
        let plan = Plan::from_name(&input.plan)?;
        let limit = input
            .daily_quota_limit
            .unwrap_or_else(|| plan.default_daily_quota());

        let query = format!(
            "INSERT INTO users (email, plan, daily_quota_limit) \
             VALUES ($1, $2, $3) \
             RETURNING {COLUMNS}"
        );
        let user = sqlx::query_as::<_, User>(&query)
            .bind(&input.email)
            .bind(plan.name())
            .bind(limit)
            .fetch_one(pool)
            .await?;
        Ok(user)
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<User>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM users WHERE id = $1");
        sqlx::query_as::<_, User>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }
}
