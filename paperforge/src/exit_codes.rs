//! Stable exit codes for paperforge CLI commands.

/// Command succeeded; for `run`, the final attempt executed successfully.
pub const OK: i32 = 0;
/// Invalid arguments or config, or the pipeline aborted with an error.
pub const INVALID: i32 = 1;
/// `paperforge run` finished but its final attempt did not execute successfully.
pub const EXECUTION_FAILED: i32 = 2;
