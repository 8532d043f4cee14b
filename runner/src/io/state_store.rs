//! Persisted test state: the line-oriented state file and its JSON duplicate.
//!
//! The line file is the source of truth and is rewritten wholesale after every
//! iteration. The JSON duplicate (`{name: {stage, percepts}}`) exists for
//! external tooling and is never read back.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use tracing::{debug, error};

use crate::core::percept::Percept;
use crate::core::record::{RecordLine, TestRecord, parse_line};
use crate::core::stage::Stage;

#[derive(Debug, Serialize)]
struct JsonEntry<'a> {
    stage: Stage,
    percepts: Option<&'a Percept>,
}

/// Load and parse every non-blank line of the state file.
///
/// A missing file, any malformed line, or a test named twice is a hard error:
/// dropping a line would lose track of a test.
pub fn load_state(path: &Path) -> Result<Vec<RecordLine>> {
    debug!(path = %path.display(), "loading state");
    let contents =
        fs::read_to_string(path).with_context(|| format!("read state {}", path.display()))?;
    let mut lines = Vec::new();
    let mut seen: BTreeMap<String, usize> = BTreeMap::new();
    for (idx, raw) in contents.lines().enumerate() {
        if raw.trim().is_empty() {
            continue;
        }
        match parse_line(raw) {
            Ok(line) => {
                let name = line_name(&line).to_string();
                if let Some(first) = seen.insert(name.clone(), idx + 1) {
                    error!(path = %path.display(), line = idx + 1, first, test = %name, "duplicate test");
                    return Err(anyhow!(
                        "{}:{}: test `{}` already listed on line {}",
                        path.display(),
                        idx + 1,
                        name,
                        first
                    ));
                }
                lines.push(line);
            }
            Err(err) => {
                error!(path = %path.display(), line = idx + 1, content = raw, err = %err, "malformed state line");
                return Err(anyhow!(
                    "{}:{}: malformed state line `{}`: {}",
                    path.display(),
                    idx + 1,
                    raw.trim(),
                    err
                ));
            }
        }
    }
    debug!(records = lines.len(), "state loaded");
    Ok(lines)
}

/// Atomically write the line file and its JSON duplicate.
pub fn write_state(path: &Path, json_path: &Path, records: &[TestRecord]) -> Result<()> {
    debug!(path = %path.display(), records = records.len(), "writing state");
    write_atomic(path, &render_lines(records))?;

    let entries: BTreeMap<&str, JsonEntry<'_>> = records
        .iter()
        .map(|record| {
            (
                record.name.as_str(),
                JsonEntry {
                    stage: record.stage,
                    percepts: record.percept.as_ref(),
                },
            )
        })
        .collect();
    let mut buf = serde_json::to_string_pretty(&entries).context("serialize state json")?;
    buf.push('\n');
    write_atomic(json_path, &buf)
}

/// Append bare names to the state file, creating it if needed.
pub fn append_fresh(path: &Path, names: &[String]) -> Result<()> {
    let mut contents = if path.exists() {
        fs::read_to_string(path).with_context(|| format!("read state {}", path.display()))?
    } else {
        String::new()
    };
    if !contents.is_empty() && !contents.ends_with('\n') {
        contents.push('\n');
    }
    for name in names {
        contents.push_str(name);
        contents.push('\n');
    }
    write_atomic(path, &contents)
}

/// Job name a state line refers to.
pub fn line_name(line: &RecordLine) -> &str {
    match line {
        RecordLine::Fresh(name) => name,
        RecordLine::Known(record) => &record.name,
    }
}

fn render_lines(records: &[TestRecord]) -> String {
    let mut buf = String::new();
    for record in records {
        buf.push_str(&record.to_line());
        buf.push('\n');
    }
    buf
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = Path::new(&tmp_name);
    fs::write(tmp_path, contents)
        .with_context(|| format!("write temp state {}", tmp_path.display()))?;
    fs::rename(tmp_path, path).with_context(|| format!("replace state {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::percept::{BuildDelta, Deployment, JobStatus};

    fn running_record() -> TestRecord {
        TestRecord::new(
            "rl10lin_AWS_Oregon_base",
            Stage::Running,
            Percept {
                deployment: Deployment::Up,
                job_status: JobStatus::Running,
                destroyer_status: JobStatus::Success,
                build_id: 12,
                build_delta: BuildDelta::Next,
            },
        )
    }

    /// Writes a mix of records, reads them back, and asserts equality.
    #[test]
    fn state_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("tests.txt");
        let json_path = temp.path().join("tests.json");
        let records = vec![running_record(), TestRecord::skipped("rl10lin_Off_Region_base")];

        write_state(&path, &json_path, &records).expect("write");
        let loaded = load_state(&path).expect("load");
        let expected: Vec<RecordLine> = records.into_iter().map(RecordLine::Known).collect();
        assert_eq!(loaded, expected);
    }

    /// Guards the JSON duplicate's shape, which external tooling reads.
    #[test]
    fn json_duplicate_is_stable() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("tests.txt");
        let json_path = temp.path().join("tests.json");

        write_state(&path, &json_path, &[running_record()]).expect("write");
        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&json_path).expect("read")).expect("json");
        assert_eq!(
            value,
            serde_json::json!({
                "rl10lin_AWS_Oregon_base": {
                    "stage": "Running",
                    "percepts": {
                        "deployment": "up",
                        "job_status": "running",
                        "destroyer_status": "success",
                        "build_id": 12,
                        "build_delta": "next"
                    }
                }
            })
        );
    }

    #[test]
    fn blank_lines_are_skipped() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("tests.txt");
        fs::write(&path, "rl10_A_B_one\n\n   \nrl10_A_B_two\n").expect("write");
        let loaded = load_state(&path).expect("load");
        assert_eq!(
            loaded,
            vec![
                RecordLine::Fresh("rl10_A_B_one".to_string()),
                RecordLine::Fresh("rl10_A_B_two".to_string())
            ]
        );
    }

    #[test]
    fn malformed_line_is_fatal_with_line_number() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("tests.txt");
        fs::write(&path, "rl10_A_B_one\nRunning rl10_A_B_two up\n").expect("write");
        let err = load_state(&path).unwrap_err();
        assert!(err.to_string().contains(":2: malformed state line"), "{err}");
    }

    #[test]
    fn duplicate_test_names_are_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("tests.txt");
        fs::write(
            &path,
            "rl10_A_B_one\nrl10_A_B_two\nDone rl10_A_B_one\n",
        )
        .expect("write");
        let err = load_state(&path).unwrap_err();
        assert!(
            err.to_string().contains(":3: test `rl10_A_B_one` already listed on line 1"),
            "{err}"
        );
    }

    #[test]
    fn missing_state_file_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(load_state(&temp.path().join("nope.txt")).is_err());
    }

    #[test]
    fn append_fresh_adds_bare_names() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("tests.txt");
        fs::write(&path, "Done rl10_A_B_one").expect("write");
        append_fresh(&path, &["rl10_A_B_two".to_string()]).expect("append");
        assert_eq!(
            fs::read_to_string(&path).expect("read"),
            "Done rl10_A_B_one\nrl10_A_B_two\n"
        );
    }
}
