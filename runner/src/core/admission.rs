//! Per-cloud admission control.

use std::collections::BTreeMap;

/// Maximum concurrent deployments allowed per cloud classification.
pub type Thresholds = BTreeMap<String, u32>;

/// Outcome of checking whether a test may launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// No threshold configured for the cloud.
    Unlimited,
    /// Below the threshold.
    Cleared { current: usize, allowed: u32 },
    /// At or above the threshold; try again next iteration.
    Held { current: usize, allowed: u32 },
}

impl Admission {
    pub fn permits_launch(self) -> bool {
        !matches!(self, Admission::Held { .. })
    }
}

/// Threshold configured for `cloud`, if any.
pub fn threshold_for(thresholds: &Thresholds, cloud: &str) -> Option<u32> {
    thresholds.get(cloud).copied()
}

/// A threshold of zero means tests for the cloud are never run.
pub fn is_skipped(thresholds: &Thresholds, cloud: &str) -> bool {
    threshold_for(thresholds, cloud) == Some(0)
}

/// Decide admission from the allowed threshold and the current count.
pub fn admit(allowed: Option<u32>, current: usize) -> Admission {
    match allowed {
        None => Admission::Unlimited,
        Some(allowed) if current < allowed as usize => Admission::Cleared { current, allowed },
        Some(allowed) => Admission::Held { current, allowed },
    }
}

/// Launch allowance for one loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LaunchBudget {
    pub limit: Option<u32>,
    pub used: u32,
}

impl LaunchBudget {
    pub fn new(limit: Option<u32>) -> Self {
        Self { limit, used: 0 }
    }

    pub fn has_room(&self) -> bool {
        self.limit.is_none_or(|limit| self.used < limit)
    }

    pub fn record_launch(&mut self) {
        self.used += 1;
    }
}

/// Deployment-name prefix counted against a cloud's threshold.
pub fn count_prefix(prefix: &str, cloud: &str) -> String {
    format!("{prefix}_{cloud}")
}
