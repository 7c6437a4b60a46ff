//! Provider orchestration between the job store and the generators.
//!
//! - [`registry`]: name → generator chain lookup with default degradation
//! - [`orchestrator`]: simplified retry and fallback per generation unit
//! - [`limiter`]: system-wide cap on concurrent provider calls
//! - [`storage`]: writes inline media bytes and returns storage pointers
//! - [`enqueue`]: validated, quota-backed job submission

pub mod enqueue;
pub mod limiter;
pub mod orchestrator;
pub mod registry;
pub mod storage;

#[cfg(test)]
pub(crate) mod testing;
