//! Observed facts about a single test at one iteration.
//!
//! Every field is a closed enum so stage guards can match structurally. The
//! textual forms (`up`, `running`, `next`, ...) are the persisted tokens of the
//! line-oriented state file.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Whether the cloud deployment for a test currently exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Deployment {
    Up,
    Down,
}

/// Status of the most recent build of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Success,
    Failure,
    Aborted,
    Unknown,
}

/// How the primary job's build number moved since the baseline was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildDelta {
    /// No new build since the baseline.
    Same,
    /// Exactly one new build since the baseline.
    Next,
    /// More than one new build (or a build number that went backwards, or
    /// could not be read). Sticky until the baseline is reset.
    Error,
}

/// Snapshot of everything the stage policies look at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Percept {
    pub deployment: Deployment,
    pub job_status: JobStatus,
    pub destroyer_status: JobStatus,
    pub build_id: u64,
    pub build_delta: BuildDelta,
}

impl Percept {
    /// Fold a newly observed build number into the percept.
    ///
    /// `build_id` tracks the last observed number; `build_delta` only moves
    /// forward (`same -> next`, `same|next -> error`).
    pub fn observe_build(&mut self, observed: u64) {
        let step = classify_build_delta(self.build_id, observed);
        self.build_delta = match (self.build_delta, step) {
            (BuildDelta::Error, _) => BuildDelta::Error,
            (current, BuildDelta::Same) => current,
            (BuildDelta::Same, BuildDelta::Next) => BuildDelta::Next,
            // A second new build after `next` means two since the baseline.
            (BuildDelta::Next, BuildDelta::Next) => BuildDelta::Error,
            (_, BuildDelta::Error) => BuildDelta::Error,
        };
        self.build_id = observed;
    }

    /// Mark the build progression as ambiguous.
    pub fn mark_build_error(&mut self) {
        self.build_delta = BuildDelta::Error;
    }

    /// Take the current `build_id` as the new baseline.
    pub fn reset_baseline(&mut self) {
        self.build_delta = BuildDelta::Same;
    }
}

/// Classify the movement between two build numbers.
///
/// Build numbers are monotonic, so a decrease is treated as an error.
pub fn classify_build_delta(previous: u64, observed: u64) -> BuildDelta {
    match observed.checked_sub(previous) {
        Some(0) => BuildDelta::Same,
        Some(1) => BuildDelta::Next,
        _ => BuildDelta::Error,
    }
}

impl Deployment {
    pub fn as_str(self) -> &'static str {
        match self {
            Deployment::Up => "up",
            Deployment::Down => "down",
        }
    }

    pub fn from_exists(exists: bool) -> Self {
        if exists {
            Deployment::Up
        } else {
            Deployment::Down
        }
    }
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Failure => "failure",
            JobStatus::Aborted => "aborted",
            JobStatus::Unknown => "unknown",
        }
    }
}

impl BuildDelta {
    pub fn as_str(self) -> &'static str {
        match self {
            BuildDelta::Same => "same",
            BuildDelta::Next => "next",
            BuildDelta::Error => "error",
        }
    }
}

impl fmt::Display for Deployment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for BuildDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Deployment {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(Deployment::Up),
            "down" => Ok(Deployment::Down),
            _ => Err(()),
        }
    }
}

impl FromStr for JobStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(JobStatus::Running),
            "success" => Ok(JobStatus::Success),
            "failure" => Ok(JobStatus::Failure),
            "aborted" => Ok(JobStatus::Aborted),
            "unknown" => Ok(JobStatus::Unknown),
            _ => Err(()),
        }
    }
}

impl FromStr for BuildDelta {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "same" => Ok(BuildDelta::Same),
            "next" => Ok(BuildDelta::Next),
            "error" => Ok(BuildDelta::Error),
            _ => Err(()),
        }
    }
}
