//! Row structs and DTOs, one module per table.

pub mod asset;
pub mod job;
pub mod status;
pub mod user;
