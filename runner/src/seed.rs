//! Populate the state file with job names from the job server.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::{info, warn};

use crate::core::percept::JobStatus;
use crate::io::actions::ExecutorSettings;
use crate::io::services::JobService;
use crate::io::state_store::{append_fresh, line_name, load_state};

#[derive(Debug, Clone)]
pub struct SeedRequest {
    pub filter: Regex,
    /// Only add jobs whose last build did not pass.
    pub not_green: bool,
}

/// Append every matching job not already tracked; returns the names added.
///
/// Candidates must carry the configured job prefix, match `filter`, and not be
/// destroyer jobs.
pub fn seed<J: JobService>(
    jobs: &J,
    settings: &ExecutorSettings,
    state_path: &Path,
    request: &SeedRequest,
) -> Result<Vec<String>> {
    let existing: BTreeSet<String> = if state_path.exists() {
        load_state(state_path)?
            .iter()
            .map(|line| line_name(line).to_string())
            .collect()
    } else {
        BTreeSet::new()
    };

    let retry = &settings.retry;
    let names = retry
        .run("list jobs", || jobs.list_jobs())
        .context("list jobs")?;
    let mut added = Vec::new();
    for name in names {
        if !name.starts_with(&settings.prefix)
            || name.starts_with(&settings.destroyer_prefix)
            || !request.filter.is_match(&name)
            || existing.contains(&name)
            || added.contains(&name)
        {
            continue;
        }
        if request.not_green {
            match retry.run("job status", || jobs.current_status(&name)) {
                Ok(JobStatus::Success) => continue,
                Ok(_) => {}
                Err(err) => warn!(job = %name, err = %err, "status unreadable, seeding anyway"),
            }
        }
        added.push(name);
    }

    if !added.is_empty() {
        append_fresh(state_path, &added)?;
    }
    info!(added = added.len(), path = %state_path.display(), "seeded state");
    Ok(added)
}
