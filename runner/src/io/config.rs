//! Runner configuration stored as TOML (default `.test_runner/config.toml`).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::admission::Thresholds;

pub const DEFAULT_CONFIG_PATH: &str = ".test_runner/config.toml";

/// Runner configuration (TOML).
///
/// Loaded once at startup. Missing fields default to the values the runner has
/// always used in production.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunnerConfig {
    /// Line-oriented state file. The JSON duplicate sits next to it.
    pub state_path: PathBuf,

    /// Job-name prefix (e.g. `rl10lin`). Deployments counted against a cloud
    /// threshold are those named `<prefix>_<cloud>...`.
    pub prefix: String,

    /// Rerun tests whose last build already passed.
    pub run_anyway: bool,

    /// Prefix that turns a job name into its destroyer job name.
    pub destroyer_prefix: String,

    /// Sleep between loop iterations.
    pub iteration_sleep_secs: u64,

    /// Stop after this many iterations even if tests are still active.
    pub max_iterations: Option<u32>,

    /// Cap on primary-job launches within one iteration.
    pub max_launches_per_iteration: Option<u32>,

    /// Max concurrent deployments per cloud. `0` means never run that cloud.
    pub thresholds: Thresholds,

    pub retry: RetryConfig,
    pub launch: LaunchConfig,
    pub jenkins: JenkinsConfig,
    pub deployments: DeploymentApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per remote call, including the first.
    pub attempts: u32,
    /// Back-off between attempts.
    pub interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LaunchConfig {
    /// Polls waiting for a triggered primary build to register.
    pub build_start_polls: u32,
    /// Polls waiting for a triggered destroyer build to register.
    pub destroyer_start_polls: u32,
    /// Polls waiting for the deployment to come up after a launch.
    pub deployment_up_polls: u32,
    pub poll_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct JenkinsConfig {
    pub url: String,
    pub user: String,
    pub api_token: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DeploymentApiConfig {
    pub url: String,
    pub access_token: String,
    pub api_version: String,
    pub request_timeout_secs: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            state_path: PathBuf::from(".test_runner/tests.txt"),
            prefix: String::new(),
            run_anyway: false,
            destroyer_prefix: "Z_".to_string(),
            iteration_sleep_secs: 15,
            max_iterations: None,
            max_launches_per_iteration: None,
            thresholds: Thresholds::new(),
            retry: RetryConfig::default(),
            launch: LaunchConfig::default(),
            jenkins: JenkinsConfig::default(),
            deployments: DeploymentApiConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 5,
            interval_ms: 1_000,
        }
    }
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            build_start_polls: 10,
            destroyer_start_polls: 4,
            deployment_up_polls: 10,
            poll_interval_secs: 10,
        }
    }
}

impl Default for JenkinsConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            user: String::new(),
            api_token: String::new(),
            request_timeout_secs: 30,
        }
    }
}

impl Default for DeploymentApiConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            access_token: String::new(),
            api_version: "1.5".to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl RunnerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.state_path.as_os_str().is_empty() {
            return Err(anyhow!("state_path must not be empty"));
        }
        if self.destroyer_prefix.is_empty() {
            return Err(anyhow!("destroyer_prefix must not be empty"));
        }
        if self.retry.attempts == 0 {
            return Err(anyhow!("retry.attempts must be > 0"));
        }
        if self.max_iterations == Some(0) {
            return Err(anyhow!("max_iterations must be > 0 when set"));
        }
        if self.jenkins.request_timeout_secs == 0 || self.deployments.request_timeout_secs == 0 {
            return Err(anyhow!("request_timeout_secs must be > 0"));
        }
        Ok(())
    }

    /// Path of the structured JSON duplicate of the state file.
    pub fn state_json_path(&self) -> PathBuf {
        self.state_path.with_extension("json")
    }
}

impl JenkinsConfig {
    pub fn ensure_configured(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(anyhow!("jenkins.url must be set"));
        }
        Ok(())
    }
}

impl DeploymentApiConfig {
    pub fn ensure_configured(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(anyhow!("deployments.url must be set"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RunnerConfig::default()`.
pub fn load_config(path: &Path) -> Result<RunnerConfig> {
    if !path.exists() {
        let cfg = RunnerConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RunnerConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &RunnerConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
