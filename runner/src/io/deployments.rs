//! Deployment API adapter for [`DeploymentService`].
//!
//! Speaks the RightScale 1.5 style `GET /api/deployments?filter[]=name==<x>`
//! endpoint. The server filter is a substring match, so `exists` and
//! `count_matching` differ only in how they read the result.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::debug;

use crate::io::config::DeploymentApiConfig;
use crate::io::services::{DeploymentService, TransientError};

const SERVICE: &str = "deployments";

pub struct DeploymentApiClient {
    client: Client,
    base_url: String,
    access_token: String,
    api_version: String,
}

#[derive(Debug, Deserialize)]
struct DeploymentRef {
    name: String,
}

impl DeploymentApiClient {
    pub fn new(cfg: &DeploymentApiConfig) -> Result<Self> {
        cfg.ensure_configured()?;
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .build()
            .context("build deployment api http client")?;
        Ok(Self {
            client,
            base_url: cfg.url.trim_end_matches('/').to_string(),
            access_token: cfg.access_token.clone(),
            api_version: cfg.api_version.clone(),
        })
    }

    /// Names of deployments matching `pattern`.
    fn matching(&self, pattern: &str) -> Result<Vec<String>, TransientError> {
        let url = format!("{}/api/deployments", self.base_url);
        debug!(url, pattern, "deployment query");
        let mut req = self
            .client
            .get(&url)
            .query(&[("filter[]", format!("name=={pattern}"))])
            .header("X-Api-Version", &self.api_version);
        if !self.access_token.is_empty() {
            req = req.bearer_auth(&self.access_token);
        }
        let response = req.send().map_err(|source| TransientError::Http {
            service: SERVICE,
            source,
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransientError::Status {
                service: SERVICE,
                status: status.as_u16(),
                url,
            });
        }
        let body = response.text().map_err(|source| TransientError::Http {
            service: SERVICE,
            source,
        })?;
        parse_deployment_names(&body)
    }
}

impl DeploymentService for DeploymentApiClient {
    fn exists(&self, name: &str) -> Result<bool, TransientError> {
        Ok(!self.matching(name)?.is_empty())
    }

    fn count_matching(&self, prefix: &str) -> Result<usize, TransientError> {
        Ok(self.matching(prefix)?.len())
    }
}

pub fn parse_deployment_names(body: &str) -> Result<Vec<String>, TransientError> {
    let deployments: Vec<DeploymentRef> =
        serde_json::from_str(body).map_err(|err| TransientError::Decode {
            service: SERVICE,
            detail: err.to_string(),
        })?;
    Ok(deployments.into_iter().map(|d| d.name).collect())
}
