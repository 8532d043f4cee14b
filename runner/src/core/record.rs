//! Test records and their line-oriented persisted form.
//!
//! A state file holds one test per line, in one of three shapes:
//!
//! ```text
//! <name>                                                        fresh test
//! <stage> <name> <deployment> <job> <destroyer> <build_id> <delta>   observed test
//! Done <name>                                                   skipped, never observed
//! ```

use serde::Serialize;
use thiserror::Error;

use crate::core::percept::Percept;
use crate::core::stage::Stage;

/// Number of whitespace-separated fields in a full record line.
pub const FULL_LINE_FIELDS: usize = 7;

/// One test tracked by the runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestRecord {
    pub name: String,
    pub stage: Stage,
    /// `None` only for tests that were skipped before they were ever observed.
    pub percept: Option<Percept>,
}

/// A parsed state line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordLine {
    /// Bare job name; the test has not been observed yet.
    Fresh(String),
    /// A record carried over from a previous iteration.
    Known(TestRecord),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordParseError {
    #[error("expected 1 or {FULL_LINE_FIELDS} fields (or `Done <name>`), got {0}")]
    FieldCount(usize),
    #[error("unknown stage `{0}`")]
    UnknownStage(String),
    #[error("invalid {field} `{value}`")]
    InvalidField { field: &'static str, value: String },
}

impl TestRecord {
    pub fn new(name: impl Into<String>, stage: Stage, percept: Percept) -> Self {
        Self {
            name: name.into(),
            stage,
            percept: Some(percept),
        }
    }

    /// A test that goes straight to `Done` without being observed.
    pub fn skipped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stage: Stage::Done,
            percept: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }

    /// Cloud/region classification derived from the job name.
    pub fn cloud(&self) -> String {
        cloud_name(&self.name)
    }

    /// Serialize to the persisted line format.
    pub fn to_line(&self) -> String {
        match &self.percept {
            Some(p) => format!(
                "{} {} {} {} {} {} {}",
                self.stage,
                self.name,
                p.deployment,
                p.job_status,
                p.destroyer_status,
                p.build_id,
                p.build_delta
            ),
            None => format!("{} {}", self.stage, self.name),
        }
    }
}

/// Parse one non-blank state line.
pub fn parse_line(line: &str) -> Result<RecordLine, RecordParseError> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    match fields.as_slice() {
        [name] => Ok(RecordLine::Fresh((*name).to_string())),
        [stage, name] => {
            let stage = parse_stage(stage)?;
            if stage != Stage::Done {
                return Err(RecordParseError::FieldCount(2));
            }
            Ok(RecordLine::Known(TestRecord::skipped(*name)))
        }
        [stage, name, deployment, job, destroyer, build_id, delta] => {
            let stage = parse_stage(stage)?;
            let percept = Percept {
                deployment: parse_field("deployment", deployment)?,
                job_status: parse_field("job status", job)?,
                destroyer_status: parse_field("destroyer status", destroyer)?,
                build_id: parse_field("build id", build_id)?,
                build_delta: parse_field("build delta", delta)?,
            };
            Ok(RecordLine::Known(TestRecord::new(*name, stage, percept)))
        }
        other => Err(RecordParseError::FieldCount(other.len())),
    }
}

fn parse_stage(raw: &str) -> Result<Stage, RecordParseError> {
    raw.parse()
        .map_err(|_| RecordParseError::UnknownStage(raw.to_string()))
}

fn parse_field<T: std::str::FromStr>(
    field: &'static str,
    raw: &str,
) -> Result<T, RecordParseError> {
    raw.parse().map_err(|_| RecordParseError::InvalidField {
        field,
        value: raw.to_string(),
    })
}

/// Cloud/region classification: the 2nd and 3rd `_`-separated tokens.
///
/// `rl10lin_Google_Silicon_monitoring` yields `Google_Silicon`. Names with
/// fewer tokens yield whatever is available (possibly an empty string).
pub fn cloud_name(name: &str) -> String {
    name.split('_').skip(1).take(2).collect::<Vec<_>>().join("_")
}
