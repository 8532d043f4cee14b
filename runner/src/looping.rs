//! The runner loop behind `test-runner run`.

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use crate::core::record::TestRecord;
use crate::intake::intake;
use crate::io::actions::ActionExecutor;
use crate::io::config::RunnerConfig;
use crate::io::services::{DeploymentService, JobService};
use crate::io::state_store::{load_state, write_state};
use crate::step::{IterationContext, StepOutcome, process_record};

/// Loop settings derived from [`RunnerConfig`] and the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopConfig {
    pub state_path: PathBuf,
    pub json_path: PathBuf,
    pub run_anyway: bool,
    pub iteration_sleep: Duration,
    pub max_iterations: Option<u32>,
    pub max_launches_per_iteration: Option<u32>,
    /// Stop after a single iteration.
    pub once: bool,
}

impl LoopConfig {
    pub fn from_config(cfg: &RunnerConfig, once: bool) -> Self {
        Self {
            state_path: cfg.state_path.clone(),
            json_path: cfg.state_json_path(),
            run_anyway: cfg.run_anyway,
            iteration_sleep: Duration::from_secs(cfg.iteration_sleep_secs),
            max_iterations: cfg.max_iterations,
            max_launches_per_iteration: cfg.max_launches_per_iteration,
            once,
        }
    }
}

/// Reason why `run_loop` stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStop {
    /// Every record reached `Done`, `Failed` or `ErrorState`.
    AllTerminal,
    /// `--once` was requested and records are still active.
    Once,
    /// The configured `max_iterations` was reached with records still active.
    MaxIterations { max_iterations: u32 },
}

/// Summary of a loop invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub iterations: u32,
    pub records: Vec<TestRecord>,
    pub stop: LoopStop,
}

impl LoopOutcome {
    /// Records not yet in a terminal stage.
    pub fn active(&self) -> usize {
        self.records.iter().filter(|r| !r.is_terminal()).count()
    }
}

/// What one iteration did, handed to the `on_iteration` callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationReport {
    pub iter: u32,
    pub steps: Vec<StepOutcome>,
    pub active: usize,
}

/// Load the state file, resolve fresh names, then iterate until every record
/// is terminal (or a configured stop is reached).
///
/// State is persisted after intake and after every iteration. A missing or
/// malformed state file is an error before any service call is made.
pub fn run_loop<J, D, F>(
    exec: &ActionExecutor<J, D>,
    cfg: &LoopConfig,
    mut on_iteration: F,
) -> Result<LoopOutcome>
where
    J: JobService,
    D: DeploymentService,
    F: FnMut(&IterationReport),
{
    let lines = load_state(&cfg.state_path)
        .with_context(|| format!("load state {}", cfg.state_path.display()))?;
    let mut records: Vec<TestRecord> = lines
        .into_iter()
        .map(|line| intake(exec, line, cfg.run_anyway))
        .collect();
    write_state(&cfg.state_path, &cfg.json_path, &records)?;
    info!(records = records.len(), "state loaded");

    let mut iter = 0u32;
    loop {
        let active = records.iter().filter(|r| !r.is_terminal()).count();
        if active == 0 {
            info!(iterations = iter, "all tests finished");
            return Ok(LoopOutcome {
                iterations: iter,
                records,
                stop: LoopStop::AllTerminal,
            });
        }
        if iter > 0 {
            if cfg.once {
                return Ok(LoopOutcome {
                    iterations: iter,
                    records,
                    stop: LoopStop::Once,
                });
            }
            if let Some(max_iterations) = cfg.max_iterations
                && iter >= max_iterations
            {
                info!(iterations = iter, active, "max_iterations reached");
                return Ok(LoopOutcome {
                    iterations: iter,
                    records,
                    stop: LoopStop::MaxIterations { max_iterations },
                });
            }
            thread::sleep(cfg.iteration_sleep);
        }

        iter += 1;
        info!(iter, active, "iteration start");
        let mut ctx = IterationContext::new(iter, cfg.max_launches_per_iteration);
        let steps: Vec<StepOutcome> = records
            .iter_mut()
            .filter_map(|record| process_record(exec, record, &mut ctx))
            .collect();
        write_state(&cfg.state_path, &cfg.json_path, &records)?;

        on_iteration(&IterationReport {
            iter,
            steps,
            active: records.iter().filter(|r| !r.is_terminal()).count(),
        });
    }
}
