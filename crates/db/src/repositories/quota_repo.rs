//! Daily quota ledger embedded in the `users` table.
//!
//! Reservation is a single conditional `UPDATE`. PostgreSQL takes the row
//! lock before evaluating the `WHERE` clause against the latest row
//! version, so concurrent reservations for the same user serialize and can
//! never jointly exceed the limit.

use adcraft_core::types::DbId;
use sqlx::{PgConnection, PgPool};

use crate::error::StoreError;

/// A successful reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    /// Quota left after this reservation.
    pub remaining: i32,
    /// The user's plan name, read under the same row lock.
    pub plan: String,
}

/// Quota ledger queries.
pub struct QuotaRepo;

impl QuotaRepo {
    /// Reserve `quantity` generations for `user_id`.
    ///
    /// Must run inside the transaction that inserts the job. On
    /// [`StoreError::QuotaExceeded`] nothing has been written.
    pub async fn reserve(
        conn: &mut PgConnection,
        user_id: DbId,
        quantity: i32,
    ) -> Result<Reservation, StoreError> {
        let reserved: Option<(i32, String)> = sqlx::query_as(
            "UPDATE users \
             SET quota_used_today = quota_used_today + $2, updated_at = NOW() \
             WHERE id = $1 AND quota_used_today + $2 <= daily_quota_limit \
             RETURNING daily_quota_limit - quota_used_today, plan",
        )
        .bind(user_id)
        .bind(quantity)
        .fetch_optional(&mut *conn)
        .await?;

        if let Some((remaining, plan)) = reserved {
            return Ok(Reservation { remaining, plan });
        }

        // Nothing matched: either the user is missing or the quota is short.
        let remaining: Option<i32> = sqlx::query_scalar(
            "SELECT GREATEST(daily_quota_limit - quota_used_today, 0) FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?;

        match remaining {
            Some(remaining) => Err(StoreError::QuotaExceeded { remaining }),
            None => Err(StoreError::user_not_found(user_id)),
        }
    }

    /// Return `quantity` generations to the user. Never drops below zero.
    pub async fn refund(pool: &PgPool, user_id: DbId, quantity: i32) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE users \
             SET quota_used_today = GREATEST(quota_used_today - $2, 0), updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(user_id)
        .bind(quantity)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Quota still available today, or `None` for an unknown user.
    pub async fn remaining(pool: &PgPool, user_id: DbId) -> Result<Option<i32>, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT GREATEST(daily_quota_limit - quota_used_today, 0) FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await
    }

    /// Zero every user's daily counter. Called by the external daily
    /// scheduler at the day boundary.
    pub async fn reset_daily(pool: &PgPool) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE users SET quota_used_today = 0, updated_at = NOW() WHERE quota_used_today <> 0",
        )
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}
