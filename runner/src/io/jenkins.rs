//! Jenkins JSON API adapter for [`JobService`].

use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::{StatusCode, Url};
use reqwest::blocking::{Client, RequestBuilder};
use serde::Deserialize;
use tracing::debug;

use crate::core::percept::JobStatus;
use crate::io::config::JenkinsConfig;
use crate::io::services::{JobService, TransientError};

const SERVICE: &str = "jenkins";

/// Blocking Jenkins client authenticated with a user API token.
pub struct JenkinsClient {
    client: Client,
    base_url: Url,
    user: String,
    api_token: String,
}

#[derive(Debug, Deserialize)]
struct LastBuild {
    building: bool,
    result: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BuildRef {
    number: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LastBuildNumber {
    last_build: Option<BuildRef>,
}

#[derive(Debug, Deserialize)]
struct BuildList {
    #[serde(default)]
    builds: Vec<BuildRef>,
}

#[derive(Debug, Deserialize)]
struct JobRef {
    name: String,
}

#[derive(Debug, Deserialize)]
struct JobList {
    #[serde(default)]
    jobs: Vec<JobRef>,
}

impl JenkinsClient {
    pub fn new(cfg: &JenkinsConfig) -> Result<Self> {
        cfg.ensure_configured()?;
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .build()
            .context("build jenkins http client")?;
        let base_url = Url::parse(cfg.url.trim())
            .with_context(|| format!("invalid jenkins.url `{}`", cfg.url))?;
        if base_url.cannot_be_a_base() {
            bail!("jenkins.url `{}` is not a base url", cfg.url);
        }
        Ok(Self {
            client,
            base_url,
            user: cfg.user.clone(),
            api_token: cfg.api_token.clone(),
        })
    }

    /// URL of `rest` under `job`. Folder paths (`team/app`) become nested
    /// `job/<segment>` pairs and each segment is percent-encoded.
    fn job_url(&self, job: &str, rest: &str) -> String {
        self.url(job.split('/').filter(|s| !s.is_empty()), rest)
    }

    fn url<'a>(&self, job_path: impl Iterator<Item = &'a str>, rest: &str) -> String {
        let (path, query) = match rest.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (rest, None),
        };
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty();
            for segment in job_path {
                segments.push("job").push(segment);
            }
            segments.extend(path.split('/'));
        }
        url.set_query(query);
        url.to_string()
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        if self.user.is_empty() {
            req
        } else {
            req.basic_auth(&self.user, Some(&self.api_token))
        }
    }

    /// Send and return the body, or `None` on 404.
    fn fetch(&self, req: RequestBuilder, url: &str) -> Result<Option<String>, TransientError> {
        debug!(url, "jenkins request");
        let response = self
            .authed(req)
            .send()
            .map_err(|source| TransientError::Http {
                service: SERVICE,
                source,
            })?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(TransientError::Status {
                service: SERVICE,
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        response
            .text()
            .map(Some)
            .map_err(|source| TransientError::Http {
                service: SERVICE,
                source,
            })
    }

    fn get(&self, url: &str) -> Result<Option<String>, TransientError> {
        self.fetch(self.client.get(url), url)
    }

    fn post(&self, url: &str) -> Result<Option<String>, TransientError> {
        self.fetch(self.client.post(url), url)
    }
}

impl JobService for JenkinsClient {
    fn trigger(&self, job: &str) -> Result<(), TransientError> {
        let url = self.job_url(job, "build");
        match self.post(&url)? {
            Some(_) => Ok(()),
            None => Err(TransientError::Status {
                service: SERVICE,
                status: StatusCode::NOT_FOUND.as_u16(),
                url,
            }),
        }
    }

    fn current_status(&self, job: &str) -> Result<JobStatus, TransientError> {
        let url = self.job_url(job, "lastBuild/api/json?tree=building,result,number");
        match self.get(&url)? {
            Some(body) => parse_status(&body),
            None => Ok(JobStatus::Unknown),
        }
    }

    fn latest_build_number(&self, job: &str) -> Result<u64, TransientError> {
        let url = self.job_url(job, "api/json?tree=lastBuild[number]");
        match self.get(&url)? {
            Some(body) => parse_latest_build_number(&body),
            None => Ok(0),
        }
    }

    fn list_builds(&self, job: &str) -> Result<Vec<u64>, TransientError> {
        let url = self.job_url(job, "api/json?tree=builds[number]");
        match self.get(&url)? {
            Some(body) => parse_build_numbers(&body),
            None => Ok(Vec::new()),
        }
    }

    fn abort(&self, job: &str) -> Result<(), TransientError> {
        // 404 means there is no build to stop.
        self.post(&self.job_url(job, "lastBuild/stop")).map(|_| ())
    }

    fn list_jobs(&self) -> Result<Vec<String>, TransientError> {
        let url = self.url(std::iter::empty(), "api/json?tree=jobs[name]");
        match self.get(&url)? {
            Some(body) => parse_job_names(&body),
            None => Ok(Vec::new()),
        }
    }
}

fn decode<'a, T: Deserialize<'a>>(body: &'a str) -> Result<T, TransientError> {
    serde_json::from_str(body).map_err(|err| TransientError::Decode {
        service: SERVICE,
        detail: err.to_string(),
    })
}

/// Map a `lastBuild` payload to a [`JobStatus`].
pub fn parse_status(body: &str) -> Result<JobStatus, TransientError> {
    let build: LastBuild = decode(body)?;
    if build.building {
        return Ok(JobStatus::Running);
    }
    Ok(match build.result.as_deref() {
        Some("SUCCESS") => JobStatus::Success,
        Some("FAILURE" | "UNSTABLE") => JobStatus::Failure,
        Some("ABORTED") => JobStatus::Aborted,
        _ => JobStatus::Unknown,
    })
}

pub fn parse_latest_build_number(body: &str) -> Result<u64, TransientError> {
    let payload: LastBuildNumber = decode(body)?;
    Ok(payload.last_build.map_or(0, |build| build.number))
}

pub fn parse_build_numbers(body: &str) -> Result<Vec<u64>, TransientError> {
    let payload: BuildList = decode(body)?;
    Ok(payload.builds.into_iter().map(|b| b.number).collect())
}

pub fn parse_job_names(body: &str) -> Result<Vec<String>, TransientError> {
    let payload: JobList = decode(body)?;
    Ok(payload.jobs.into_iter().map(|j| j.name).collect())
}
