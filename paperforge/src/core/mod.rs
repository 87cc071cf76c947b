//! Deterministic, pure logic shared by the pipeline.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data (code strings, run records, captured output) and return deterministic
//! results suitable for tests.

pub mod budget;
pub mod config_keys;
pub mod imports;
pub mod invariants;
pub mod materialize;
pub mod metrics;
pub mod routing;
pub mod structured;
pub mod types;
