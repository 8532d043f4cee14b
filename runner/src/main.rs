//! `test-runner`: drive many test jobs to completion through a percept-driven
//! state machine.
//!
//! Reads the test list from a line-oriented state file, observes each test's
//! job and deployment, and fires launch/abort/destroy actions until every test
//! is `Done`, `Failed` or `ErrorState`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use regex::Regex;
use tracing::info;

use test_runner::exit_codes;
use test_runner::io::actions::{ActionExecutor, ExecutorSettings};
use test_runner::io::config::{DEFAULT_CONFIG_PATH, RunnerConfig, load_config, write_config};
use test_runner::io::deployments::DeploymentApiClient;
use test_runner::io::jenkins::JenkinsClient;
use test_runner::io::state_store::load_state;
use test_runner::logging;
use test_runner::looping::{LoopConfig, LoopStop, run_loop};
use test_runner::seed::{SeedRequest, seed};
use test_runner::status::StatusReport;

#[derive(Parser)]
#[command(
    name = "test-runner",
    version,
    about = "Percept-driven orchestrator for test jobs"
)]
struct Cli {
    /// Runner config (TOML).
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default config file.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Run the loop until every test is terminal.
    Run {
        /// Stop after a single iteration.
        #[arg(long)]
        once: bool,
    },
    /// Print per-stage counts from the state file.
    Status,
    /// Append job names from the job server to the state file.
    Seed {
        /// Regex job names must match.
        #[arg(long)]
        filter: String,
        /// Skip jobs whose last build passed.
        #[arg(long)]
        not_green: bool,
    },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { force } => cmd_init(&cli.config, force),
        Command::Run { once } => cmd_run(&load_config(&cli.config)?, once),
        Command::Status => cmd_status(&load_config(&cli.config)?),
        Command::Seed { filter, not_green } => {
            cmd_seed(&load_config(&cli.config)?, &filter, not_green)
        }
    }
}

fn cmd_init(path: &Path, force: bool) -> Result<i32> {
    if !force && path.exists() {
        println!("{} already exists (use --force to overwrite)", path.display());
        return Ok(exit_codes::OK);
    }
    write_config(path, &RunnerConfig::default())?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

fn cmd_run(cfg: &RunnerConfig, once: bool) -> Result<i32> {
    if !cfg.state_path.exists() {
        bail!(
            "state file {} not found (add test names or run `test-runner seed`)",
            cfg.state_path.display()
        );
    }
    // Fail on malformed state before building clients.
    load_state(&cfg.state_path)?;
    let exec = ActionExecutor::new(
        JenkinsClient::new(&cfg.jenkins)?,
        DeploymentApiClient::new(&cfg.deployments)?,
        ExecutorSettings::from_config(cfg),
    );
    let outcome = run_loop(&exec, &LoopConfig::from_config(cfg, once), |report| {
        info!(iter = report.iter, steps = report.steps.len(), active = report.active, "iteration done");
    })?;

    println!(
        "{} iteration(s), {} of {} test(s) still active",
        outcome.iterations,
        outcome.active(),
        outcome.records.len()
    );
    Ok(match outcome.stop {
        LoopStop::AllTerminal => exit_codes::OK,
        LoopStop::Once | LoopStop::MaxIterations { .. } => exit_codes::INCOMPLETE,
    })
}

fn cmd_status(cfg: &RunnerConfig) -> Result<i32> {
    let lines = load_state(&cfg.state_path)?;
    println!("{}", StatusReport::from_lines(&lines));
    Ok(exit_codes::OK)
}

fn cmd_seed(cfg: &RunnerConfig, filter: &str, not_green: bool) -> Result<i32> {
    let request = SeedRequest {
        filter: Regex::new(filter).with_context(|| format!("invalid --filter `{filter}`"))?,
        not_green,
    };
    let jobs = JenkinsClient::new(&cfg.jenkins)?;
    let added = seed(
        &jobs,
        &ExecutorSettings::from_config(cfg),
        &cfg.state_path,
        &request,
    )?;
    for name in &added {
        println!("{name}");
    }
    Ok(exit_codes::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["test-runner", "init", "--force"]);
        assert!(matches!(cli.command, Command::Init { force: true }));
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_PATH));
    }

    #[test]
    fn parse_run_once_with_config() {
        let cli = Cli::parse_from(["test-runner", "run", "--once", "--config", "nightly.toml"]);
        assert!(matches!(cli.command, Command::Run { once: true }));
        assert_eq!(cli.config, PathBuf::from("nightly.toml"));
    }

    #[test]
    fn parse_seed_requires_filter() {
        assert!(Cli::try_parse_from(["test-runner", "seed"]).is_err());
        let cli = Cli::parse_from(["test-runner", "seed", "--filter", "AWS_.*", "--not-green"]);
        match cli.command {
            Command::Seed { filter, not_green } => {
                assert_eq!(filter, "AWS_.*");
                assert!(not_green);
            }
            _ => panic!("expected seed"),
        }
    }
}
