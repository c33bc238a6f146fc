//! Stable exit codes for the planets CLI.

/// Every selected task ran or was up to date.
pub const OK: i32 = 0;
/// At least one task failed or was skipped because a dependency failed.
pub const TASK_FAILED: i32 = 1;
/// Invalid command line. clap exits with this before anything runs.
pub const USAGE: i32 = 2;
/// Tasks could not be declared or planned (bad config, unknown task,
/// discovery failure).
pub const ERROR: i32 = 3;
