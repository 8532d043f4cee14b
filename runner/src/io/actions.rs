//! Action executor: retry-wrapped reads and side effects against the job and
//! deployment services.
//!
//! Nothing here decides *what* to do next; stage policies do that. Every call
//! is best effort. A failed action is logged and reported as
//! [`ActionOutcome::Failed`], and the next iteration re-observes the world and
//! tries again.

use std::thread;
use std::time::Duration;

use tracing::{error, info, instrument, warn};

use crate::core::admission::{Admission, LaunchBudget, Thresholds, admit, count_prefix, threshold_for};
use crate::core::percept::{Deployment, JobStatus};
use crate::core::record::TestRecord;
use crate::core::stage::Action;
use crate::io::config::{LaunchConfig, RunnerConfig};
use crate::io::retry::RetryPolicy;
use crate::io::services::{DeploymentService, JobService, TransientError};

/// Result of firing an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    /// The side effect happened (or the action is a no-op).
    Completed,
    /// The action chose not to act (admission threshold or launch budget).
    Declined,
    /// The side effect could not be confirmed; the next iteration retries.
    Failed,
}

/// Bounded waits used after triggering jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchWaits {
    pub build_start_polls: u32,
    pub destroyer_start_polls: u32,
    pub deployment_up_polls: u32,
    pub poll_interval: Duration,
}

impl From<&LaunchConfig> for LaunchWaits {
    fn from(cfg: &LaunchConfig) -> Self {
        Self {
            build_start_polls: cfg.build_start_polls,
            destroyer_start_polls: cfg.destroyer_start_polls,
            deployment_up_polls: cfg.deployment_up_polls,
            poll_interval: Duration::from_secs(cfg.poll_interval_secs),
        }
    }
}

/// Everything the executor needs from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorSettings {
    pub prefix: String,
    pub destroyer_prefix: String,
    pub thresholds: Thresholds,
    pub retry: RetryPolicy,
    pub waits: LaunchWaits,
}

impl ExecutorSettings {
    pub fn from_config(cfg: &RunnerConfig) -> Self {
        Self {
            prefix: cfg.prefix.clone(),
            destroyer_prefix: cfg.destroyer_prefix.clone(),
            thresholds: cfg.thresholds.clone(),
            retry: RetryPolicy::from(&cfg.retry),
            waits: LaunchWaits::from(&cfg.launch),
        }
    }
}

pub struct ActionExecutor<J, D> {
    jobs: J,
    deployments: D,
    settings: ExecutorSettings,
}

impl<J: JobService, D: DeploymentService> ActionExecutor<J, D> {
    pub fn new(jobs: J, deployments: D, settings: ExecutorSettings) -> Self {
        Self {
            jobs,
            deployments,
            settings,
        }
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    /// Name of the teardown job paired with `name`.
    pub fn destroyer_name(&self, name: &str) -> String {
        format!("{}{}", self.settings.destroyer_prefix, name)
    }

    pub fn deployment(&self, name: &str) -> Result<Deployment, TransientError> {
        self.settings
            .retry
            .run("deployment exists", || self.deployments.exists(name))
            .map(Deployment::from_exists)
    }

    pub fn job_status(&self, name: &str) -> Result<JobStatus, TransientError> {
        self.settings
            .retry
            .run("job status", || self.jobs.current_status(name))
    }

    pub fn destroyer_status(&self, name: &str) -> Result<JobStatus, TransientError> {
        self.job_status(&self.destroyer_name(name))
    }

    pub fn build_number(&self, name: &str) -> Result<u64, TransientError> {
        self.settings
            .retry
            .run("build number", || self.jobs.latest_build_number(name))
    }

    /// Fire `action` for `record`.
    pub fn execute(
        &self,
        action: Action,
        record: &mut TestRecord,
        budget: &mut LaunchBudget,
    ) -> ActionOutcome {
        match action {
            Action::LaunchJob => self.launch_job(record),
            Action::LaunchDestroyer => self.launch_destroyer(record),
            Action::AbortJob => self.abort_job(record),
            Action::AbortDestroyer => self.abort_destroyer(record),
            Action::LaunchIfCleared => self.launch_if_cleared(record, budget),
            Action::Wait => self.wait(record),
        }
    }

    /// Launch the primary job if the test's cloud is below its threshold.
    #[instrument(skip_all, fields(test = %record.name))]
    pub fn launch_if_cleared(
        &self,
        record: &mut TestRecord,
        budget: &mut LaunchBudget,
    ) -> ActionOutcome {
        if !budget.has_room() {
            info!(used = budget.used, limit = ?budget.limit, "launch limit reached this iteration, holding");
            return ActionOutcome::Declined;
        }

        let cloud = record.cloud();
        let admission = match threshold_for(&self.settings.thresholds, &cloud) {
            None => Admission::Unlimited,
            Some(allowed) => {
                let filter = count_prefix(&self.settings.prefix, &cloud);
                match self
                    .settings
                    .retry
                    .run("count deployments", || self.deployments.count_matching(&filter))
                {
                    Ok(current) => admit(Some(allowed), current),
                    Err(err) => {
                        warn!(cloud = %cloud, err = %err, "could not count deployments, holding launch");
                        return ActionOutcome::Failed;
                    }
                }
            }
        };

        match admission {
            Admission::Held { current, allowed } => {
                info!(cloud = %cloud, current, allowed, "threshold reached, holding launch");
            }
            Admission::Cleared { current, allowed } => {
                info!(cloud = %cloud, current, allowed, "threshold clear, launching");
            }
            Admission::Unlimited => {
                info!(cloud = %cloud, "no threshold for cloud, launching");
            }
        }
        if !admission.permits_launch() {
            return ActionOutcome::Declined;
        }

        budget.record_launch();
        self.launch_job(record)
    }

    /// Trigger the primary job and wait for its deployment to come up.
    ///
    /// If the trigger never went out the record is left untouched and the
    /// launch is retried next iteration. If the build never registers or the
    /// deployment never appears, the record's build delta is set to `error`
    /// so the stage stops trusting it.
    #[instrument(skip_all, fields(test = %record.name))]
    pub fn launch_job(&self, record: &mut TestRecord) -> ActionOutcome {
        let waits = self.settings.waits;
        match self.register_build(&record.name, waits.build_start_polls) {
            Registration::NotTriggered => return ActionOutcome::Failed,
            Registration::Registered => {
                for poll in 1..=waits.deployment_up_polls {
                    thread::sleep(waits.poll_interval);
                    info!(poll, polls = waits.deployment_up_polls, "waiting for deployment to come up");
                    if matches!(self.deployment(&record.name), Ok(Deployment::Up)) {
                        return ActionOutcome::Completed;
                    }
                }
                error!("timed out waiting for deployment to be created");
            }
            Registration::NotRegistered => {}
        }
        if let Some(percept) = record.percept.as_mut() {
            percept.mark_build_error();
        }
        ActionOutcome::Failed
    }

    #[instrument(skip_all, fields(test = %record.name))]
    pub fn launch_destroyer(&self, record: &mut TestRecord) -> ActionOutcome {
        let destroyer = self.destroyer_name(&record.name);
        match self.register_build(&destroyer, self.settings.waits.destroyer_start_polls) {
            Registration::Registered => ActionOutcome::Completed,
            Registration::NotTriggered | Registration::NotRegistered => ActionOutcome::Failed,
        }
    }

    #[instrument(skip_all, fields(test = %record.name))]
    pub fn abort_job(&self, record: &mut TestRecord) -> ActionOutcome {
        self.abort(&record.name)
    }

    #[instrument(skip_all, fields(test = %record.name))]
    pub fn abort_destroyer(&self, record: &mut TestRecord) -> ActionOutcome {
        self.abort(&self.destroyer_name(&record.name))
    }

    pub fn wait(&self, record: &TestRecord) -> ActionOutcome {
        info!(test = %record.name, "no-op, waiting");
        ActionOutcome::Completed
    }

    fn abort(&self, job: &str) -> ActionOutcome {
        match self.settings.retry.run("abort", || self.jobs.abort(job)) {
            Ok(()) => {
                info!(job, "abort requested");
                ActionOutcome::Completed
            }
            Err(err) => {
                warn!(job, err = %err, "abort not confirmed");
                ActionOutcome::Failed
            }
        }
    }

    /// Trigger `job` and wait until its newest build is exactly one past the
    /// newest build seen before the trigger.
    ///
    /// Build numbers are compared rather than list lengths: the job server
    /// only returns the most recent builds.
    fn register_build(&self, job: &str, polls: u32) -> Registration {
        let retry = &self.settings.retry;
        let before = match retry.run("list builds", || self.jobs.list_builds(job)) {
            Ok(builds) => newest(&builds),
            Err(err) => {
                warn!(job, err = %err, "could not list builds before trigger");
                return Registration::NotTriggered;
            }
        };
        if let Err(err) = retry.run("trigger", || self.jobs.trigger(job)) {
            warn!(job, err = %err, "trigger failed");
            return Registration::NotTriggered;
        }
        for poll in 1..=polls {
            if let Ok(builds) = retry.run("list builds", || self.jobs.list_builds(job))
                && newest(&builds) == before + 1
            {
                info!(job, build = before + 1, "registered new build");
                return Registration::Registered;
            }
            info!(job, poll, polls, "waiting for build to start");
            thread::sleep(self.settings.waits.poll_interval);
        }
        error!(job, polls, "job did not launch");
        Registration::NotRegistered
    }
}

/// Result of triggering a job and waiting for its build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Registration {
    Registered,
    /// Nothing was launched: the pre-trigger read or the trigger failed.
    NotTriggered,
    /// Triggered, but no single new build showed up in time.
    NotRegistered,
}

fn newest(builds: &[u64]) -> u64 {
    builds.iter().copied().max().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::percept::{BuildDelta, Percept};
    use crate::core::stage::{Action, Stage};
    use crate::test_support::{FakeCloud, JobCall, instant_settings};

    fn launching(name: &str) -> TestRecord {
        TestRecord::new(
            name,
            Stage::StageLaunch,
            Percept {
                deployment: Deployment::Down,
                job_status: JobStatus::Success,
                destroyer_status: JobStatus::Success,
                build_id: 41,
                build_delta: BuildDelta::Same,
            },
        )
    }

    fn executor(cloud: &FakeCloud, thresholds: &[(&str, u32)]) -> ActionExecutor<FakeCloud, FakeCloud> {
        let mut settings = instant_settings("proj");
        settings.thresholds = thresholds
            .iter()
            .map(|(cloud, n)| ((*cloud).to_string(), *n))
            .collect();
        ActionExecutor::new(cloud.clone(), cloud.clone(), settings)
    }

    #[test]
    fn launch_if_cleared_launches_below_threshold() {
        let name = "proj_CloudA_Region_foo";
        let cloud = FakeCloud::new();
        cloud.set_builds(name, 41);
        cloud.start_on_trigger(name);
        cloud.set_count("proj_CloudA_Region", 1);

        let exec = executor(&cloud, &[("CloudA_Region", 2)]);
        let mut record = launching(name);
        let mut budget = LaunchBudget::default();

        let outcome = exec.launch_if_cleared(&mut record, &mut budget);
        assert_eq!(outcome, ActionOutcome::Completed);
        assert_eq!(budget.used, 1);
        assert!(cloud.calls().contains(&JobCall::Trigger(name.to_string())));
        assert_eq!(record.percept.map(|p| p.build_delta), Some(BuildDelta::Same));
    }

    #[test]
    fn launch_if_cleared_holds_at_threshold() {
        let cloud = FakeCloud::new();
        cloud.set_count("proj_CloudA_Region", 2);
        let exec = executor(&cloud, &[("CloudA_Region", 2)]);
        let mut record = launching("proj_CloudA_Region_foo");
        let mut budget = LaunchBudget::default();

        let outcome = exec.launch_if_cleared(&mut record, &mut budget);
        assert_eq!(outcome, ActionOutcome::Declined);
        assert_eq!(budget.used, 0);
        assert!(cloud.triggered().is_empty());
    }

    #[test]
    fn launch_if_cleared_without_threshold_ignores_counts() {
        let name = "proj_CloudB_Region_foo";
        let cloud = FakeCloud::new();
        cloud.start_on_trigger(name);
        cloud.set_count("proj_CloudB_Region", 1_000);
        let exec = executor(&cloud, &[("CloudA_Region", 2)]);
        let mut record = launching(name);

        let outcome = exec.launch_if_cleared(&mut record, &mut LaunchBudget::default());
        assert_eq!(outcome, ActionOutcome::Completed);
        assert_eq!(cloud.triggered(), vec![name.to_string()]);
        assert_eq!(cloud.count_queries(), 0);
    }

    #[test]
    fn launch_if_cleared_respects_launch_budget() {
        let cloud = FakeCloud::new();
        let exec = executor(&cloud, &[]);
        let mut record = launching("proj_CloudA_Region_foo");
        let mut budget = LaunchBudget::new(Some(0));

        let outcome = exec.launch_if_cleared(&mut record, &mut budget);
        assert_eq!(outcome, ActionOutcome::Declined);
        assert!(cloud.triggered().is_empty());
    }

    #[test]
    fn launch_if_cleared_holds_when_count_unavailable() {
        let cloud = FakeCloud::new();
        cloud.fail_deployments(true);
        let exec = executor(&cloud, &[("CloudA_Region", 2)]);
        let mut record = launching("proj_CloudA_Region_foo");

        let outcome = exec.launch_if_cleared(&mut record, &mut LaunchBudget::default());
        assert_eq!(outcome, ActionOutcome::Failed);
        assert!(cloud.triggered().is_empty());
    }

    #[test]
    fn launch_timeout_marks_build_error() {
        let name = "proj_CloudA_Region_foo";
        let cloud = FakeCloud::new();
        // Build registers but the deployment never appears.
        cloud.register_on_trigger(name);
        let exec = executor(&cloud, &[]);
        let mut record = launching(name);

        let outcome = exec.launch_job(&mut record);
        assert_eq!(outcome, ActionOutcome::Failed);
        assert_eq!(record.percept.map(|p| p.build_delta), Some(BuildDelta::Error));
    }

    #[test]
    fn unregistered_build_marks_build_error() {
        let name = "proj_CloudA_Region_foo";
        let cloud = FakeCloud::new();
        let exec = executor(&cloud, &[]);
        let mut record = launching(name);

        let outcome = exec.launch_job(&mut record);
        assert_eq!(outcome, ActionOutcome::Failed);
        assert_eq!(cloud.triggered(), vec![name.to_string()]);
        assert_eq!(record.percept.map(|p| p.build_delta), Some(BuildDelta::Error));
    }

    #[test]
    fn launch_registers_on_jobs_with_long_history() {
        let name = "proj_CloudA_Region_foo";
        let cloud = FakeCloud::new();
        // More builds than the job server lists.
        cloud.set_builds(name, 150);
        cloud.start_on_trigger(name);
        let exec = executor(&cloud, &[]);
        let mut record = launching(name);

        assert_eq!(exec.launch_job(&mut record), ActionOutcome::Completed);
        assert_eq!(record.percept.map(|p| p.build_delta), Some(BuildDelta::Same));
        assert_eq!(exec.build_number(name).expect("build"), 151);
    }

    #[test]
    fn launch_that_never_triggers_is_retried_next_iteration() {
        let name = "proj_CloudA_Region_foo";
        let cloud = FakeCloud::new();
        cloud.set_builds(name, 41);
        cloud.start_on_trigger(name);
        cloud.fail_next(5);
        let exec = executor(&cloud, &[]);
        let mut record = launching(name);

        let outcome = exec.launch_if_cleared(&mut record, &mut LaunchBudget::default());
        assert_eq!(outcome, ActionOutcome::Failed);
        assert!(cloud.triggered().is_empty());
        let percept = record.percept.expect("percept");
        assert_eq!(percept.build_delta, BuildDelta::Same);
        assert_eq!(
            Stage::StageLaunch.decide(&percept).action,
            Some(Action::LaunchIfCleared)
        );

        let outcome = exec.launch_if_cleared(&mut record, &mut LaunchBudget::default());
        assert_eq!(outcome, ActionOutcome::Completed);
        assert_eq!(cloud.triggered(), vec![name.to_string()]);
    }

    #[test]
    fn destroyer_uses_prefixed_job_name() {
        let name = "proj_CloudA_Region_foo";
        let cloud = FakeCloud::new();
        cloud.destroy_on_trigger("Z_proj_CloudA_Region_foo", name);
        cloud.deploy(name);
        let exec = executor(&cloud, &[]);
        let mut record = launching(name);

        assert_eq!(exec.launch_destroyer(&mut record), ActionOutcome::Completed);
        assert_eq!(cloud.triggered(), vec!["Z_proj_CloudA_Region_foo".to_string()]);
        assert_eq!(exec.deployment(name).expect("exists"), Deployment::Down);
        assert_eq!(exec.abort_destroyer(&mut record), ActionOutcome::Completed);
        assert_eq!(cloud.aborted(), vec!["Z_proj_CloudA_Region_foo".to_string()]);
    }

    #[test]
    fn reads_retry_through_transient_failures() {
        let name = "proj_CloudA_Region_foo";
        let cloud = FakeCloud::new();
        cloud.set_status(name, JobStatus::Running);
        cloud.fail_next(4);
        let exec = executor(&cloud, &[]);

        assert_eq!(exec.job_status(name).expect("status"), JobStatus::Running);
    }

    #[test]
    fn abort_failure_is_soft() {
        let cloud = FakeCloud::new();
        cloud.fail_next(5);
        let exec = executor(&cloud, &[]);
        let mut record = launching("proj_CloudA_Region_foo");

        assert_eq!(exec.abort_job(&mut record), ActionOutcome::Failed);
        assert_eq!(cloud.aborted().len(), 5);
    }
}
