//! Repository for the append-only `assets` table.

use adcraft_core::types::JobId;
use sqlx::PgPool;

use crate::models::asset::{Asset, NewAsset};

/// Column list for `assets` queries.
const COLUMNS: &str = "\
    id, user_id, job_id, kind, storage_pointer, format, width, height, \
    byte_size, provider_metadata, created_at";

/// Insert and list generated assets. There is no update path.
pub struct AssetRepo;

impl AssetRepo {
    pub async fn create(pool: &PgPool, input: &NewAsset) -> Result<Asset, sqlx::Error> {
        let query = format!(
            "INSERT INTO assets \
                 (user_id, job_id, kind, storage_pointer, format, width, height, byte_size, provider_metadata) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Asset>(&query)
            .bind(input.user_id)
            .bind(input.job_id)
            .bind(&input.kind)
            .bind(&input.storage_pointer)
            .bind(&input.format)
            .bind(input.width)
            .bind(input.height)
            .bind(input.byte_size)
            .bind(&input.provider_metadata)
            .fetch_one(pool)
            .await
    }

    /// All assets of a job in insertion order.
    pub async fn list_by_job(pool: &PgPool, job_id: JobId) -> Result<Vec<Asset>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM assets WHERE job_id = $1 ORDER BY id ASC");
        sqlx::query_as::<_, Asset>(&query)
            .bind(job_id)
            .fetch_all(pool)
            .await
    }
}
