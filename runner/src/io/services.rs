//! Remote collaborators the runner observes and drives.
//!
//! The [`JobService`] and [`DeploymentService`] traits decouple the runner from
//! the concrete backends (Jenkins and the deployment API). Tests use scripted
//! fakes that replay predetermined answers without touching the network.

use thiserror::Error;

use crate::core::percept::JobStatus;

/// A remote call failed in a way that may succeed on retry.
#[derive(Debug, Error)]
pub enum TransientError {
    #[error("request to {service} failed: {source}")]
    Http {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{service} returned {status} for {url}")]
    Status {
        service: &'static str,
        status: u16,
        url: String,
    },
    #[error("{service} response could not be decoded: {detail}")]
    Decode {
        service: &'static str,
        detail: String,
    },
    #[error("{0}")]
    Other(String),
}

/// Build server that owns the primary and destroyer jobs.
pub trait JobService {
    /// Queue a new build of `job`.
    fn trigger(&self, job: &str) -> Result<(), TransientError>;
    /// Status of the most recent build of `job`.
    fn current_status(&self, job: &str) -> Result<JobStatus, TransientError>;
    /// Number of the most recent build of `job` (0 if it never ran).
    fn latest_build_number(&self, job: &str) -> Result<u64, TransientError>;
    /// Build numbers known for `job`, newest first.
    fn list_builds(&self, job: &str) -> Result<Vec<u64>, TransientError>;
    /// Abort the running build of `job`, if any.
    fn abort(&self, job: &str) -> Result<(), TransientError>;
    /// Names of all jobs on the server.
    fn list_jobs(&self) -> Result<Vec<String>, TransientError>;
}

/// Cloud management API that owns the test deployments.
pub trait DeploymentService {
    /// Whether a deployment matching `name` exists.
    fn exists(&self, name: &str) -> Result<bool, TransientError>;
    /// Number of deployments whose name matches `prefix`.
    fn count_matching(&self, prefix: &str) -> Result<usize, TransientError>;
}
