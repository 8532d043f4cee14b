//! Percept refresh: re-observe one test through the executor's reads.

use tracing::{debug, warn};

use crate::core::percept::{BuildDelta, Deployment, JobStatus, Percept};
use crate::core::record::TestRecord;
use crate::io::actions::ActionExecutor;
use crate::io::services::{DeploymentService, JobService};

/// Observe a test that has never been seen before.
///
/// Unreadable fields fall back to values that route the test through cleanup:
/// the deployment is assumed up, statuses unknown, and an unreadable build
/// number leaves the build progression in `error`.
pub fn observe_fresh<J: JobService, D: DeploymentService>(
    exec: &ActionExecutor<J, D>,
    name: &str,
) -> Percept {
    let deployment = exec.deployment(name).unwrap_or_else(|err| {
        warn!(test = name, err = %err, "deployment unreadable, assuming up");
        Deployment::Up
    });
    let job_status = exec.job_status(name).unwrap_or(JobStatus::Unknown);
    let destroyer_status = exec.destroyer_status(name).unwrap_or(JobStatus::Unknown);
    let (build_id, build_delta) = match exec.build_number(name) {
        Ok(number) => (number, BuildDelta::Same),
        Err(err) => {
            warn!(test = name, err = %err, "build number unreadable");
            (0, BuildDelta::Error)
        }
    };
    Percept {
        deployment,
        job_status,
        destroyer_status,
        build_id,
        build_delta,
    }
}

/// Refresh `record`'s percept in place.
///
/// Fields that cannot be read keep their previous value; an unreadable build
/// number forces `build_delta` to `error`. Records without a percept (skipped
/// at intake) are left alone.
pub fn refresh<J: JobService, D: DeploymentService>(
    exec: &ActionExecutor<J, D>,
    record: &mut TestRecord,
) {
    let name = record.name.as_str();
    let Some(percept) = record.percept.as_mut() else {
        return;
    };

    match exec.deployment(name) {
        Ok(deployment) => percept.deployment = deployment,
        Err(err) => warn!(test = name, err = %err, "keeping last deployment state"),
    }
    match exec.job_status(name) {
        Ok(status) => percept.job_status = status,
        Err(err) => warn!(test = name, err = %err, "keeping last job status"),
    }
    match exec.destroyer_status(name) {
        Ok(status) => percept.destroyer_status = status,
        Err(err) => warn!(test = name, err = %err, "keeping last destroyer status"),
    }
    match exec.build_number(name) {
        Ok(number) => percept.observe_build(number),
        Err(err) => {
            warn!(test = name, err = %err, "build number unreadable, marking build error");
            percept.mark_build_error();
        }
    }
    debug!(
        test = name,
        deployment = %percept.deployment,
        job = %percept.job_status,
        destroyer = %percept.destroyer_status,
        build_id = percept.build_id,
        build_delta = %percept.build_delta,
        "refreshed"
    );
}
