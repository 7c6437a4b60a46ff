//! Shared domain types for the adcraft generation pipeline.
//!
//! Everything here is pure: no database, no network. The db, providers,
//! pipeline and worker crates all build on these definitions.

pub mod error;
pub mod generation;
pub mod plans;
pub mod providers;
pub mod types;
