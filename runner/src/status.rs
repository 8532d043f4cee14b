//! Read-only summary of the state file.

use std::fmt;

use crate::core::record::RecordLine;
use crate::core::stage::Stage;

/// Per-stage record counts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusReport {
    /// Bare names not yet observed.
    pub fresh: usize,
    /// Count per stage, in [`Stage::ALL`] order.
    pub by_stage: [usize; Stage::ALL.len()],
}

impl StatusReport {
    pub fn from_lines(lines: &[RecordLine]) -> Self {
        let mut report = Self::default();
        for line in lines {
            match line {
                RecordLine::Fresh(_) => report.fresh += 1,
                RecordLine::Known(record) => {
                    if let Some(idx) = Stage::ALL.iter().position(|s| *s == record.stage) {
                        report.by_stage[idx] += 1;
                    }
                }
            }
        }
        report
    }

    pub fn count(&self, stage: Stage) -> usize {
        Stage::ALL
            .iter()
            .position(|s| *s == stage)
            .map_or(0, |idx| self.by_stage[idx])
    }

    pub fn total(&self) -> usize {
        self.fresh + self.by_stage.iter().sum::<usize>()
    }

    /// Records that still need work (fresh or in a non-terminal stage).
    pub fn active(&self) -> usize {
        self.fresh
            + Stage::ALL
                .iter()
                .filter(|s| !s.is_terminal())
                .map(|s| self.count(*s))
                .sum::<usize>()
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<16}{}", "Fresh", self.fresh)?;
        for stage in Stage::ALL {
            writeln!(f, "{:<16}{}", stage.as_str(), self.count(stage))?;
        }
        write!(f, "{:<16}{}", "Total", self.total())
    }
}
