//! GitOps controller repository
//!
//! Narrow view of the controller API used by the sync services, plus a connector
//! that authenticates a client for a given tool registration.

use anyhow::{Context, Result};
use async_trait::async_trait;
use keel_client::{GitOpsClient, ResourceActionTarget};
use keel_core::domain::application::{Application, ResourceTree};
use keel_core::domain::tool::ToolDetails;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::http_client;

/// Controller operations used by the sync services
#[async_trait]
pub trait GitOpsApi: Send + Sync {
    /// Fetches an application with its current operation state
    async fn get_application(&self, name: &str) -> Result<Application>;

    /// Triggers (or re-attaches to) a sync operation
    async fn sync_application(&self, name: &str) -> Result<Application>;

    /// Fetches the live resource graph
    async fn get_resource_tree(&self, name: &str) -> Result<ResourceTree>;

    /// Fetches recent logs of one pod
    async fn get_pod_logs(&self, application: &str, namespace: &str, pod: &str) -> Result<String>;

    /// Runs a named resource action
    async fn run_resource_action(
        &self,
        application: &str,
        target: &ResourceActionTarget,
        action: &str,
    ) -> Result<()>;
}

#[async_trait]
impl GitOpsApi for GitOpsClient {
    async fn get_application(&self, name: &str) -> Result<Application> {
        GitOpsClient::get_application(self, name)
            .await
            .with_context(|| format!("Failed to get application {}", name))
    }

    async fn sync_application(&self, name: &str) -> Result<Application> {
        GitOpsClient::sync_application(self, name)
            .await
            .with_context(|| format!("Failed to sync application {}", name))
    }

    async fn get_resource_tree(&self, name: &str) -> Result<ResourceTree> {
        GitOpsClient::get_resource_tree(self, name)
            .await
            .with_context(|| format!("Failed to get resource tree of {}", name))
    }

    async fn get_pod_logs(&self, application: &str, namespace: &str, pod: &str) -> Result<String> {
        GitOpsClient::get_pod_logs(self, application, namespace, pod)
            .await
            .with_context(|| format!("Failed to get logs of pod {}", pod))
    }

    async fn run_resource_action(
        &self,
        application: &str,
        target: &ResourceActionTarget,
        action: &str,
    ) -> Result<()> {
        GitOpsClient::run_resource_action(self, application, target, action)
            .await
            .with_context(|| format!("Failed to run action {} on {}", action, target.resource_name))
    }
}

/// Produces authenticated controller clients
#[async_trait]
pub trait GitOpsConnector: Send + Sync {
    /// Opens a session against the controller described by `details`
    ///
    /// # Arguments
    /// * `details` - Tool registration (base URL and username)
    /// * `password` - Plaintext credential resolved from the secret store
    async fn connect(&self, details: &ToolDetails, password: &str) -> Result<Arc<dyn GitOpsApi>>;
}

/// Connector backed by `keel_client::GitOpsClient`
///
/// All clients share one connection pool with a per-request timeout.
pub struct HttpGitOpsConnector {
    client: Client,
}

impl HttpGitOpsConnector {
    /// Creates a connector whose requests time out after `request_timeout`
    pub fn new(request_timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(request_timeout)?,
        })
    }
}

#[async_trait]
impl GitOpsConnector for HttpGitOpsConnector {
    async fn connect(&self, details: &ToolDetails, password: &str) -> Result<Arc<dyn GitOpsApi>> {
        debug!("Opening GitOps session at {}", details.url);

        let client = GitOpsClient::with_client(details.url.clone(), self.client.clone())
            .login(&details.username, password)
            .await
            .with_context(|| format!("Failed to open GitOps session at {}", details.url))?;

        Ok(Arc::new(client))
    }
}
