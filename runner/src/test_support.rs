//! Test-only helpers: a scripted in-memory job server + deployment API.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use tempfile::TempDir;

use crate::core::admission::Thresholds;
use crate::core::percept::{BuildDelta, Deployment, JobStatus, Percept};
use crate::io::actions::{ExecutorSettings, LaunchWaits};
use crate::io::retry::RetryPolicy;
use crate::io::services::{DeploymentService, JobService, TransientError};
use crate::looping::LoopConfig;

/// Job-service call recorded by [`FakeCloud`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobCall {
    Trigger(String),
    Status(String),
    BuildNumber(String),
    ListBuilds(String),
    Abort(String),
    ListJobs,
}

/// Builds returned by `list_builds`, newest first, like Jenkins' `builds` tree.
pub const LISTED_BUILDS: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
enum OnTrigger {
    /// New build, job running.
    Register,
    /// New build, job running, deployment named after the job comes up.
    Start,
    /// New build, job succeeded, deployment torn down.
    Destroy { deployment: String },
}

#[derive(Debug, Default)]
struct FakeJob {
    builds: Vec<u64>,
    status: Option<JobStatus>,
}

#[derive(Debug, Default)]
struct CloudState {
    jobs: BTreeMap<String, FakeJob>,
    job_names: Vec<String>,
    on_trigger: BTreeMap<String, OnTrigger>,
    deployments: BTreeSet<String>,
    counts: BTreeMap<String, usize>,
    calls: Vec<JobCall>,
    deployment_queries: usize,
    count_queries: usize,
    fail_next: u32,
    deployments_down: bool,
}

impl CloudState {
    fn take_failure(&mut self) -> Result<(), TransientError> {
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return Err(TransientError::Other("scripted failure".to_string()));
        }
        Ok(())
    }

    fn push_build(&mut self, job: &str, status: JobStatus) {
        let entry = self.jobs.entry(job.to_string()).or_default();
        let next = entry.builds.last().copied().unwrap_or(0) + 1;
        entry.builds.push(next);
        entry.status = Some(status);
    }
}

/// Shared-state fake implementing both [`JobService`] and [`DeploymentService`].
///
/// Clones share state, so a test can keep a handle and reshape the world
/// between iterations while the executor owns another clone.
#[derive(Debug, Clone, Default)]
pub struct FakeCloud {
    state: Rc<RefCell<CloudState>>,
}

impl FakeCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// Give `job` builds `1..=latest`.
    pub fn set_builds(&self, job: &str, latest: u64) {
        let mut state = self.state.borrow_mut();
        state.jobs.entry(job.to_string()).or_default().builds = (1..=latest).collect();
    }

    pub fn set_status(&self, job: &str, status: JobStatus) {
        let mut state = self.state.borrow_mut();
        state.jobs.entry(job.to_string()).or_default().status = Some(status);
    }

    /// Simulate someone else starting a build of `job`.
    pub fn external_build(&self, job: &str, status: JobStatus) {
        self.state.borrow_mut().push_build(job, status);
    }

    /// Triggering `job` registers a running build.
    pub fn register_on_trigger(&self, job: &str) {
        self.state
            .borrow_mut()
            .on_trigger
            .insert(job.to_string(), OnTrigger::Register);
    }

    /// Triggering `job` registers a running build and brings its deployment up.
    pub fn start_on_trigger(&self, job: &str) {
        self.state
            .borrow_mut()
            .on_trigger
            .insert(job.to_string(), OnTrigger::Start);
    }

    /// Triggering `destroyer` registers a successful build and removes `deployment`.
    pub fn destroy_on_trigger(&self, destroyer: &str, deployment: &str) {
        self.state.borrow_mut().on_trigger.insert(
            destroyer.to_string(),
            OnTrigger::Destroy {
                deployment: deployment.to_string(),
            },
        );
    }

    pub fn deploy(&self, name: &str) {
        self.state.borrow_mut().deployments.insert(name.to_string());
    }

    pub fn teardown(&self, name: &str) {
        self.state.borrow_mut().deployments.remove(name);
    }

    /// Override `count_matching(prefix)`.
    pub fn set_count(&self, prefix: &str, count: usize) {
        self.state
            .borrow_mut()
            .counts
            .insert(prefix.to_string(), count);
    }

    pub fn set_job_names(&self, names: &[&str]) {
        self.state.borrow_mut().job_names = names.iter().map(|n| (*n).to_string()).collect();
    }

    /// Fail the next `n` service calls of any kind.
    pub fn fail_next(&self, n: u32) {
        self.state.borrow_mut().fail_next = n;
    }

    /// Make every deployment call fail until further notice.
    pub fn fail_deployments(&self, down: bool) {
        self.state.borrow_mut().deployments_down = down;
    }

    pub fn calls(&self) -> Vec<JobCall> {
        self.state.borrow().calls.clone()
    }

    pub fn triggered(&self) -> Vec<String> {
        self.state
            .borrow()
            .calls
            .iter()
            .filter_map(|call| match call {
                JobCall::Trigger(job) => Some(job.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn aborted(&self) -> Vec<String> {
        self.state
            .borrow()
            .calls
            .iter()
            .filter_map(|call| match call {
                JobCall::Abort(job) => Some(job.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn count_queries(&self) -> usize {
        self.state.borrow().count_queries
    }

    /// Total number of calls made to either service.
    pub fn total_calls(&self) -> usize {
        let state = self.state.borrow();
        state.calls.len() + state.deployment_queries + state.count_queries
    }
}

impl JobService for FakeCloud {
    fn trigger(&self, job: &str) -> Result<(), TransientError> {
        let mut state = self.state.borrow_mut();
        state.calls.push(JobCall::Trigger(job.to_string()));
        state.take_failure()?;
        match state.on_trigger.get(job).cloned() {
            Some(OnTrigger::Register) => state.push_build(job, JobStatus::Running),
            Some(OnTrigger::Start) => {
                state.push_build(job, JobStatus::Running);
                state.deployments.insert(job.to_string());
            }
            Some(OnTrigger::Destroy { deployment }) => {
                state.push_build(job, JobStatus::Success);
                state.deployments.remove(&deployment);
            }
            None => {}
        }
        Ok(())
    }

    fn current_status(&self, job: &str) -> Result<JobStatus, TransientError> {
        let mut state = self.state.borrow_mut();
        state.calls.push(JobCall::Status(job.to_string()));
        state.take_failure()?;
        Ok(state
            .jobs
            .get(job)
            .and_then(|j| j.status)
            .unwrap_or(JobStatus::Unknown))
    }

    fn latest_build_number(&self, job: &str) -> Result<u64, TransientError> {
        let mut state = self.state.borrow_mut();
        state.calls.push(JobCall::BuildNumber(job.to_string()));
        state.take_failure()?;
        Ok(state
            .jobs
            .get(job)
            .and_then(|j| j.builds.last().copied())
            .unwrap_or(0))
    }

    fn list_builds(&self, job: &str) -> Result<Vec<u64>, TransientError> {
        let mut state = self.state.borrow_mut();
        state.calls.push(JobCall::ListBuilds(job.to_string()));
        state.take_failure()?;
        let mut builds = state
            .jobs
            .get(job)
            .map(|j| j.builds.clone())
            .unwrap_or_default();
        builds.reverse();
        builds.truncate(LISTED_BUILDS);
        Ok(builds)
    }

    fn abort(&self, job: &str) -> Result<(), TransientError> {
        let mut state = self.state.borrow_mut();
        state.calls.push(JobCall::Abort(job.to_string()));
        state.take_failure()?;
        if let Some(entry) = state.jobs.get_mut(job)
            && entry.status == Some(JobStatus::Running)
        {
            entry.status = Some(JobStatus::Aborted);
        }
        Ok(())
    }

    fn list_jobs(&self) -> Result<Vec<String>, TransientError> {
        let mut state = self.state.borrow_mut();
        state.calls.push(JobCall::ListJobs);
        state.take_failure()?;
        Ok(state.job_names.clone())
    }
}

impl DeploymentService for FakeCloud {
    fn exists(&self, name: &str) -> Result<bool, TransientError> {
        let mut state = self.state.borrow_mut();
        state.deployment_queries += 1;
        if state.deployments_down {
            return Err(TransientError::Other("deployment api down".to_string()));
        }
        state.take_failure()?;
        Ok(state.deployments.iter().any(|d| d.contains(name)))
    }

    fn count_matching(&self, prefix: &str) -> Result<usize, TransientError> {
        let mut state = self.state.borrow_mut();
        state.count_queries += 1;
        if state.deployments_down {
            return Err(TransientError::Other("deployment api down".to_string()));
        }
        state.take_failure()?;
        if let Some(count) = state.counts.get(prefix) {
            return Ok(*count);
        }
        Ok(state
            .deployments
            .iter()
            .filter(|d| d.contains(prefix))
            .count())
    }
}

/// Executor settings with no sleeping and small poll budgets.
pub fn instant_settings(prefix: &str) -> ExecutorSettings {
    ExecutorSettings {
        prefix: prefix.to_string(),
        destroyer_prefix: "Z_".to_string(),
        thresholds: Thresholds::new(),
        retry: RetryPolicy {
            attempts: 5,
            interval: Duration::ZERO,
        },
        waits: LaunchWaits {
            build_start_polls: 3,
            destroyer_start_polls: 2,
            deployment_up_polls: 3,
            poll_interval: Duration::ZERO,
        },
    }
}

/// Build a percept from its parts.
pub fn percept(
    deployment: Deployment,
    job_status: JobStatus,
    destroyer_status: JobStatus,
    build_id: u64,
    build_delta: BuildDelta,
) -> Percept {
    Percept {
        deployment,
        job_status,
        destroyer_status,
        build_id,
        build_delta,
    }
}

/// Temporary directory holding a state file and its JSON duplicate.
pub struct TempState {
    dir: TempDir,
}

impl TempState {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            dir: tempfile::tempdir()?,
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn state_path(&self) -> PathBuf {
        self.path().join("tests.txt")
    }

    pub fn json_path(&self) -> PathBuf {
        self.path().join("tests.json")
    }

    pub fn write(&self, contents: &str) -> io::Result<()> {
        fs::write(self.state_path(), contents)
    }

    pub fn read(&self) -> io::Result<String> {
        fs::read_to_string(self.state_path())
    }

    pub fn read_json(&self) -> io::Result<serde_json::Value> {
        let raw = fs::read_to_string(self.json_path())?;
        serde_json::from_str(&raw).map_err(io::Error::other)
    }

    /// Loop settings over this state with no sleeping and a safety bound.
    pub fn loop_config(&self, once: bool) -> LoopConfig {
        LoopConfig {
            state_path: self.state_path(),
            json_path: self.json_path(),
            run_anyway: false,
            iteration_sleep: Duration::ZERO,
            max_iterations: Some(25),
            max_launches_per_iteration: None,
            once,
        }
    }
}
