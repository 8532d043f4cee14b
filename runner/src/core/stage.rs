//! Stage policy table: the reflex agent's state machine.
//!
//! Each stage evaluates an ordered list of percept guards and the first match
//! wins. Guards overlap (a running job is aborted before the deployment is
//! looked at), so arm order is the priority order.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::percept::{BuildDelta, Deployment, JobStatus, Percept};

/// Lifecycle stage of a test record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    /// Initial stage: clean up any leftovers before a fresh attempt.
    DestroyAndRerun,
    /// Waiting for clearance to launch, or for the launched build to appear.
    StageLaunch,
    /// The launched build is in progress.
    Running,
    /// The build passed.
    Done,
    /// The build ran and failed.
    Failed,
    /// No trustworthy result (aborted build, ambiguous builds, launch timeout).
    ErrorState,
}

/// Side effect a policy may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    LaunchJob,
    LaunchDestroyer,
    AbortJob,
    AbortDestroyer,
    LaunchIfCleared,
    Wait,
}

/// Result of evaluating a stage policy against a percept.
///
/// When both fields are set the action fires before the transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Decision {
    pub action: Option<Action>,
    pub next: Option<Stage>,
}

impl Decision {
    /// No guard matched; leave the record untouched this iteration.
    pub const IDLE: Decision = Decision {
        action: None,
        next: None,
    };

    pub fn act(action: Action) -> Self {
        Self {
            action: Some(action),
            next: None,
        }
    }

    pub fn transition(next: Stage) -> Self {
        Self {
            action: None,
            next: Some(next),
        }
    }

    pub fn act_then(action: Action, next: Stage) -> Self {
        Self {
            action: Some(action),
            next: Some(next),
        }
    }

    pub fn is_idle(&self) -> bool {
        self.action.is_none() && self.next.is_none()
    }
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::DestroyAndRerun,
        Stage::StageLaunch,
        Stage::Running,
        Stage::Done,
        Stage::Failed,
        Stage::ErrorState,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::DestroyAndRerun => "DestroyAndRerun",
            Stage::StageLaunch => "StageLaunch",
            Stage::Running => "Running",
            Stage::Done => "Done",
            Stage::Failed => "Failed",
            Stage::ErrorState => "ErrorState",
        }
    }

    /// Terminal stages are never evaluated again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Done | Stage::Failed | Stage::ErrorState)
    }

    /// Evaluate this stage's policy.
    pub fn decide(self, percept: &Percept) -> Decision {
        match self {
            Stage::DestroyAndRerun => destroy_and_rerun(percept),
            Stage::StageLaunch => stage_launch(percept),
            Stage::Running => running(percept),
            Stage::Done | Stage::Failed | Stage::ErrorState => Decision::IDLE,
        }
    }
}

fn destroy_and_rerun(p: &Percept) -> Decision {
    match (p.job_status, p.destroyer_status, p.deployment) {
        (JobStatus::Running, _, _) => Decision::act(Action::AbortJob),
        (_, JobStatus::Running, _) => Decision::act(Action::Wait),
        (_, _, Deployment::Up) => Decision::act(Action::LaunchDestroyer),
        (_, _, Deployment::Down) => Decision::transition(Stage::StageLaunch),
    }
}

fn stage_launch(p: &Percept) -> Decision {
    match (p.build_delta, p.job_status, p.deployment) {
        (BuildDelta::Next, JobStatus::Running, _) => Decision::transition(Stage::Running),
        (BuildDelta::Next, JobStatus::Failure, _) => {
            Decision::act_then(Action::LaunchDestroyer, Stage::Failed)
        }
        (BuildDelta::Next, JobStatus::Aborted, _) => Decision::transition(Stage::ErrorState),
        (BuildDelta::Next, JobStatus::Success, _) => Decision::transition(Stage::Done),
        (BuildDelta::Error, _, Deployment::Down) => Decision::transition(Stage::ErrorState),
        (BuildDelta::Same, _, Deployment::Down) => Decision::act(Action::LaunchIfCleared),
        _ => Decision::IDLE,
    }
}

fn running(p: &Percept) -> Decision {
    match (p.job_status, p.deployment) {
        (JobStatus::Aborted, _) => Decision::transition(Stage::ErrorState),
        (JobStatus::Running, _) => Decision::act(Action::Wait),
        (JobStatus::Success, _) => Decision::transition(Stage::Done),
        (JobStatus::Failure, Deployment::Up) => {
            Decision::act_then(Action::LaunchDestroyer, Stage::Failed)
        }
        (JobStatus::Failure, Deployment::Down) => Decision::transition(Stage::Failed),
        (JobStatus::Unknown, _) => Decision::IDLE,
    }
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::LaunchJob => "launch_job",
            Action::LaunchDestroyer => "launch_destroyer",
            Action::AbortJob => "abort_job",
            Action::AbortDestroyer => "abort_destroyer",
            Action::LaunchIfCleared => "launch_if_cleared",
            Action::Wait => "wait",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or(())
    }
}
