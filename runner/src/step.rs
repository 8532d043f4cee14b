//! One record's share of a loop iteration: refresh, decide, apply.

use tracing::{info, instrument};

use crate::core::admission::LaunchBudget;
use crate::core::record::TestRecord;
use crate::core::stage::{Action, Stage};
use crate::io::actions::{ActionExecutor, ActionOutcome};
use crate::io::services::{DeploymentService, JobService};
use crate::refresh::refresh;

/// State shared by every record within one iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationContext {
    /// Iteration number (1-indexed).
    pub iter: u32,
    pub budget: LaunchBudget,
}

impl IterationContext {
    pub fn new(iter: u32, launch_limit: Option<u32>) -> Self {
        Self {
            iter,
            budget: LaunchBudget::new(launch_limit),
        }
    }
}

/// What happened to one record during an iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub test: String,
    /// Stage the record was in when the policy ran.
    pub stage: Stage,
    pub action: Option<Action>,
    pub action_outcome: Option<ActionOutcome>,
    /// Stage the record moved to, if it transitioned.
    pub next: Option<Stage>,
}

/// Refresh `record`, evaluate its stage policy, and apply the decision.
///
/// The action (if any) fires before the transition. Entering `StageLaunch`
/// takes the current build number as the new baseline. Terminal records are
/// not touched and yield `None`.
#[instrument(skip_all, fields(iter = ctx.iter, test = %record.name))]
pub fn process_record<J: JobService, D: DeploymentService>(
    exec: &ActionExecutor<J, D>,
    record: &mut TestRecord,
    ctx: &mut IterationContext,
) -> Option<StepOutcome> {
    if record.is_terminal() {
        return None;
    }
    refresh(exec, record);
    let percept = record.percept?;

    let stage = record.stage;
    let decision = stage.decide(&percept);
    let action_outcome = decision
        .action
        .map(|action| exec.execute(action, record, &mut ctx.budget));

    if let Some(next) = decision.next {
        record.stage = next;
        if next == Stage::StageLaunch
            && let Some(p) = record.percept.as_mut()
        {
            p.reset_baseline();
        }
    }

    info!(
        stage = %stage,
        action = decision.action.map_or("none", Action::as_str),
        outcome = ?action_outcome,
        next = decision.next.map_or("stay", Stage::as_str),
        "decision"
    );

    Some(StepOutcome {
        test: record.name.clone(),
        stage,
        action: decision.action,
        action_outcome,
        next: decision.next,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::percept::{BuildDelta, Deployment, JobStatus, Percept};
    use crate::test_support::{FakeCloud, instant_settings, percept};

    const NAME: &str = "rl10_CloudA_Region_base";
    const DESTROYER: &str = "Z_rl10_CloudA_Region_base";

    fn executor(cloud: &FakeCloud, thresholds: &[(&str, u32)]) -> ActionExecutor<FakeCloud, FakeCloud> {
        let mut settings = instant_settings("rl10");
        settings.thresholds = thresholds
            .iter()
            .map(|(cloud, n)| ((*cloud).to_string(), *n))
            .collect();
        ActionExecutor::new(cloud.clone(), cloud.clone(), settings)
    }

    fn record(stage: Stage, p: Percept) -> TestRecord {
        TestRecord::new(NAME, stage, p)
    }

    #[test]
    fn running_job_is_aborted_before_cleanup() {
        let cloud = FakeCloud::new();
        cloud.deploy(NAME);
        cloud.set_status(NAME, JobStatus::Running);
        cloud.set_builds(NAME, 5);
        let exec = executor(&cloud, &[]);
        let mut rec = record(
            Stage::DestroyAndRerun,
            percept(Deployment::Up, JobStatus::Running, JobStatus::Unknown, 5, BuildDelta::Same),
        );

        let outcome = process_record(&exec, &mut rec, &mut IterationContext::new(1, None))
            .expect("active record");
        assert_eq!(outcome.action, Some(Action::AbortJob));
        assert_eq!(outcome.next, None);
        assert_eq!(rec.stage, Stage::DestroyAndRerun);
        assert_eq!(cloud.aborted(), vec![NAME.to_string()]);
    }

    #[test]
    fn deployment_down_moves_to_stage_launch_with_fresh_baseline() {
        let cloud = FakeCloud::new();
        cloud.set_status(NAME, JobStatus::Failure);
        cloud.set_builds(NAME, 8);
        let exec = executor(&cloud, &[]);
        // Baseline is stale: the record last saw build 7.
        let mut rec = record(
            Stage::DestroyAndRerun,
            percept(Deployment::Up, JobStatus::Failure, JobStatus::Success, 7, BuildDelta::Same),
        );

        let outcome = process_record(&exec, &mut rec, &mut IterationContext::new(1, None))
            .expect("active record");
        assert_eq!(outcome.next, Some(Stage::StageLaunch));
        assert_eq!(rec.stage, Stage::StageLaunch);
        let p = rec.percept.expect("percept");
        assert_eq!((p.build_id, p.build_delta), (8, BuildDelta::Same));
        assert!(cloud.triggered().is_empty());
    }

    #[test]
    fn failed_run_launches_destroyer_then_fails() {
        let cloud = FakeCloud::new();
        cloud.deploy(NAME);
        cloud.set_status(NAME, JobStatus::Failure);
        cloud.set_builds(NAME, 4);
        cloud.destroy_on_trigger(DESTROYER, NAME);
        let exec = executor(&cloud, &[]);
        let mut rec = record(
            Stage::Running,
            percept(Deployment::Up, JobStatus::Running, JobStatus::Success, 4, BuildDelta::Next),
        );

        let outcome = process_record(&exec, &mut rec, &mut IterationContext::new(1, None))
            .expect("active record");
        assert_eq!(outcome.action, Some(Action::LaunchDestroyer));
        assert_eq!(outcome.action_outcome, Some(ActionOutcome::Completed));
        assert_eq!(rec.stage, Stage::Failed);
        assert_eq!(cloud.triggered(), vec![DESTROYER.to_string()]);
    }

    #[test]
    fn terminal_records_are_left_alone() {
        let cloud = FakeCloud::new();
        let exec = executor(&cloud, &[]);
        let mut rec = record(
            Stage::Done,
            percept(Deployment::Down, JobStatus::Success, JobStatus::Success, 2, BuildDelta::Next),
        );
        assert!(process_record(&exec, &mut rec, &mut IterationContext::new(1, None)).is_none());
        assert_eq!(cloud.total_calls(), 0);
    }

    #[test]
    fn launch_budget_is_shared_across_records() {
        let cloud = FakeCloud::new();
        let other = "rl10_CloudA_Region_other";
        cloud.start_on_trigger(NAME);
        cloud.start_on_trigger(other);
        let exec = executor(&cloud, &[]);
        let mut ctx = IterationContext::new(1, Some(1));
        let idle = percept(Deployment::Down, JobStatus::Success, JobStatus::Success, 0, BuildDelta::Same);
        let mut first = TestRecord::new(NAME, Stage::StageLaunch, idle);
        let mut second = TestRecord::new(other, Stage::StageLaunch, idle);

        let a = process_record(&exec, &mut first, &mut ctx).expect("active");
        let b = process_record(&exec, &mut second, &mut ctx).expect("active");
        assert_eq!(a.action_outcome, Some(ActionOutcome::Completed));
        assert_eq!(b.action_outcome, Some(ActionOutcome::Declined));
        assert_eq!(cloud.triggered(), vec![NAME.to_string()]);
    }
}
