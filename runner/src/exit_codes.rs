//! Stable exit codes for `test-runner` commands.

/// Command succeeded; for `run`, every test reached a terminal stage.
pub const OK: i32 = 0;
/// Invalid config, missing or malformed state file, or any other error.
pub const INVALID: i32 = 1;
/// `run` stopped with tests still active (`--once` or `max_iterations`).
pub const INCOMPLETE: i32 = 2;
