//! Configuration service repository
//!
//! Resolves per-step tool configuration, tool registrations and the run counter.

use anyhow::{Context, Result};
use async_trait::async_trait;
use keel_core::domain::tool::{ToolConfig, ToolDetails};
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

use super::http_client;

/// Repository trait for pipeline/tool configuration lookups
#[async_trait]
pub trait ConfigResolver: Send + Sync {
    /// Fetches the run counter of a step invocation
    ///
    /// The counter is monotonic per step and identifies retries of the same step.
    async fn run_count(&self, pipeline_id: &str, step_id: &str) -> Result<u64>;

    /// Fetches the tool configuration of a pipeline step
    async fn tool_config(&self, pipeline_id: &str, step_id: &str) -> Result<ToolConfig>;

    /// Fetches a tool registration (GitOps controller, git host or cluster)
    async fn tool_details(&self, customer_id: &str, tool_id: &str) -> Result<ToolDetails>;
}

/// HTTP implementation of ConfigResolver
pub struct HttpConfigRepository {
    client: Client,
    config_service_url: String,
}

impl HttpConfigRepository {
    /// Creates a new HTTP configuration repository
    ///
    /// # Arguments
    /// * `config_service_url` - Base URL of the configuration service
    /// * `request_timeout` - Ceiling for one lookup
    pub fn new(config_service_url: String, request_timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(request_timeout)?,
            config_service_url: config_service_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, what: &str) -> Result<T> {
        let url = format!("{}{}", self.config_service_url, path);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch {}", what))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Failed to fetch {}: {} - {}", what, status, body);
        }

        response
            .json::<T>()
            .await
            .with_context(|| format!("Failed to parse {}", what))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunCountResponse {
    run_count: u64,
}

#[async_trait]
impl ConfigResolver for HttpConfigRepository {
    async fn run_count(&self, pipeline_id: &str, step_id: &str) -> Result<u64> {
        let path = format!(
            "/api/v1/pipelines/{}/steps/{}/run-count",
            pipeline_id, step_id
        );
        let body: RunCountResponse = self.get_json(&path, "run count").await?;
        Ok(body.run_count)
    }

    async fn tool_config(&self, pipeline_id: &str, step_id: &str) -> Result<ToolConfig> {
        let path = format!(
            "/api/v1/pipelines/{}/steps/{}/tool-config",
            pipeline_id, step_id
        );
        self.get_json(&path, "tool configuration").await
    }

    async fn tool_details(&self, customer_id: &str, tool_id: &str) -> Result<ToolDetails> {
        let path = format!("/api/v1/customers/{}/tools/{}", customer_id, tool_id);
        self.get_json(&path, "tool details").await
    }
}
