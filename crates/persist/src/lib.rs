//! Persistence sink for sensor observations.
//!
//! # Invariants
//! - Logs are append-only; a record is never rewritten.
//! - A log file is opened lazily, on the first record.
//! - One log per sensor instance; the dispatcher serializes writes to it.

pub mod log;

pub use log::{LogError, ObservationLog, read_log};
