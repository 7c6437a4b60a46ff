/// Users and assets use PostgreSQL BIGSERIAL primary keys.
pub type DbId = i64;

/// Jobs are keyed by a UUID v7 generated at enqueue time.
pub type JobId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Generate a fresh, time-ordered job identifier.
pub fn new_job_id() -> JobId {
    uuid::Uuid::now_v7()
}
