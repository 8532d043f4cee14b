//! Percept-driven orchestrator for long-running test jobs.
//!
//! Each test is a record in a small finite-state machine. Every iteration the
//! runner re-observes the world (deployment presence, job and destroyer
//! status, build-number progression), feeds that percept to the record's stage
//! policy, and fires an action and/or moves the record to its next stage.
//!
//! - **[`core`]**: Pure, deterministic logic (percepts, stage policies, record
//!   lines, admission). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (config, state files, the job and
//!   deployment services, retry). Remote services sit behind traits so tests can
//!   script them.
//!
//! Orchestration modules ([`intake`], [`refresh`], [`step`], [`looping`],
//! [`seed`], [`status`]) coordinate core logic with I/O to implement CLI
//! commands.

pub mod core;
pub mod exit_codes;
pub mod intake;
pub mod io;
pub mod logging;
pub mod looping;
pub mod refresh;
pub mod seed;
pub mod status;
pub mod step;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
