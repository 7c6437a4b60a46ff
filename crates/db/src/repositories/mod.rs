//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async query methods
//! that accept `&PgPool` (or a transaction's connection) as the first
//! argument.

pub mod asset_repo;
pub mod job_repo;
pub mod quota_repo;
pub mod user_repo;

pub use asset_repo::AssetRepo;
pub use job_repo::JobRepo;
pub use quota_repo::{QuotaRepo, Reservation};
pub use user_repo::UserRepo;
