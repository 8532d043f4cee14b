//! Turning persisted state lines into live test records.

use tracing::info;

use crate::core::admission::is_skipped;
use crate::core::percept::JobStatus;
use crate::core::record::{RecordLine, TestRecord, cloud_name};
use crate::core::stage::Stage;
use crate::io::actions::ActionExecutor;
use crate::io::services::{DeploymentService, JobService};
use crate::refresh::observe_fresh;

/// Resolve one state line into a record.
///
/// Known records pass through untouched. A fresh name is either skipped
/// (its cloud has a zero threshold, no service call is made) or observed once
/// and placed in its starting stage.
pub fn intake<J: JobService, D: DeploymentService>(
    exec: &ActionExecutor<J, D>,
    line: RecordLine,
    run_anyway: bool,
) -> TestRecord {
    let name = match line {
        RecordLine::Known(record) => return record,
        RecordLine::Fresh(name) => name,
    };

    let cloud = cloud_name(&name);
    if is_skipped(&exec.settings().thresholds, &cloud) {
        info!(test = %name, cloud = %cloud, stage = %Stage::Done, "cloud threshold is 0, skipping");
        return TestRecord::skipped(name);
    }

    let percept = observe_fresh(exec, &name);
    let stage = if !run_anyway && percept.job_status == JobStatus::Success {
        Stage::Done
    } else {
        Stage::DestroyAndRerun
    };
    info!(test = %name, stage = %stage, job = %percept.job_status, "new test");
    TestRecord::new(name, stage, percept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::percept::{BuildDelta, Deployment};
    use crate::test_support::{FakeCloud, instant_settings, percept};

    fn executor(cloud: &FakeCloud) -> ActionExecutor<FakeCloud, FakeCloud> {
        let mut settings = instant_settings("rl10");
        settings.thresholds = [("Off_Region".to_string(), 0), ("CloudA_Region".to_string(), 2)]
            .into_iter()
            .collect();
        ActionExecutor::new(cloud.clone(), cloud.clone(), settings)
    }

    #[test]
    fn zero_threshold_goes_straight_to_done_without_calls() {
        let cloud = FakeCloud::new();
        let record = intake(
            &executor(&cloud),
            RecordLine::Fresh("rl10_Off_Region_base".to_string()),
            false,
        );
        assert_eq!(record, TestRecord::skipped("rl10_Off_Region_base"));
        assert_eq!(cloud.total_calls(), 0);
    }

    #[test]
    fn green_job_is_done_unless_run_anyway() {
        let name = "rl10_CloudA_Region_base";
        let cloud = FakeCloud::new();
        cloud.set_status(name, JobStatus::Success);
        cloud.set_builds(name, 3);
        let exec = executor(&cloud);

        let done = intake(&exec, RecordLine::Fresh(name.to_string()), false);
        assert_eq!(done.stage, Stage::Done);
        assert_eq!(done.percept.map(|p| p.build_id), Some(3));

        let rerun = intake(&exec, RecordLine::Fresh(name.to_string()), true);
        assert_eq!(rerun.stage, Stage::DestroyAndRerun);
    }

    #[test]
    fn fresh_test_starts_in_destroy_and_rerun() {
        let name = "rl10_CloudA_Region_base";
        let cloud = FakeCloud::new();
        cloud.set_status(name, JobStatus::Failure);
        let record = intake(&executor(&cloud), RecordLine::Fresh(name.to_string()), false);
        assert_eq!(record.stage, Stage::DestroyAndRerun);
        assert_eq!(
            record.percept,
            Some(percept(
                Deployment::Down,
                JobStatus::Failure,
                JobStatus::Unknown,
                0,
                BuildDelta::Same
            ))
        );
    }

    #[test]
    fn known_record_passes_through() {
        let cloud = FakeCloud::new();
        let known = TestRecord::new(
            "rl10_CloudA_Region_base",
            Stage::Running,
            percept(
                Deployment::Up,
                JobStatus::Running,
                JobStatus::Success,
                9,
                BuildDelta::Next,
            ),
        );
        let record = intake(&executor(&cloud), RecordLine::Known(known.clone()), false);
        assert_eq!(record, known);
        assert_eq!(cloud.total_calls(), 0);
    }
}
