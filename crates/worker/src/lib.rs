//! Background generation worker.
//!
//! [`dispatcher::JobDispatcher`] claims queued jobs and runs them through the
//! provider chain; [`reaper`] recovers jobs abandoned by crashed workers.

pub mod config;
pub mod dispatcher;
pub mod reaper;
