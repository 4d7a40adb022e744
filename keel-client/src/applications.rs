//! Application endpoints

use keel_core::domain::application::{
    Application, ApplicationList, PodLogEnvelope, ResourceTree,
};
use serde::Serialize;
use tracing::{debug, warn};

use crate::GitOpsClient;
use crate::error::Result;

/// Number of trailing log lines requested per pod
const POD_LOG_TAIL_LINES: u32 = 1000;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SyncRequest {
    prune: bool,
    dry_run: bool,
}

/// Resource addressed by a resource action (e.g. a Rollout)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceActionTarget {
    pub namespace: String,
    pub resource_name: String,
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl ResourceActionTarget {
    /// Progressive rollout resource
    pub fn rollout(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            resource_name: name.into(),
            group: "argoproj.io".to_string(),
            version: "v1alpha1".to_string(),
            kind: "Rollout".to_string(),
        }
    }
}

impl GitOpsClient {
    // =============================================================================
    // Application Query
    // =============================================================================

    /// Get an application, including its current operation state
    pub async fn get_application(&self, name: &str) -> Result<Application> {
        let url = self.url(&format!("/api/v1/applications/{}", name));
        let response = self.authorize(self.client.get(&url)).send().await?;

        self.handle_response(response).await
    }

    /// List all applications visible to the session
    pub async fn list_applications(&self) -> Result<Vec<Application>> {
        let url = self.url("/api/v1/applications");
        let response = self.authorize(self.client.get(&url)).send().await?;

        let list: ApplicationList = self.handle_response(response).await?;
        Ok(list.items.unwrap_or_default())
    }

    /// Get the live resource graph of an application
    pub async fn get_resource_tree(&self, name: &str) -> Result<ResourceTree> {
        let url = self.url(&format!("/api/v1/applications/{}/resource-tree", name));
        let response = self.authorize(self.client.get(&url)).send().await?;

        self.handle_response(response).await
    }

    // =============================================================================
    // Operations
    // =============================================================================

    /// Trigger a sync of an application
    ///
    /// Syncing an application that already has an operation in flight re-attaches
    /// to that operation on the controller side.
    pub async fn sync_application(&self, name: &str) -> Result<Application> {
        let url = self.url(&format!("/api/v1/applications/{}/sync", name));
        let response = self
            .authorize(self.client.post(&url))
            .json(&SyncRequest {
                prune: false,
                dry_run: false,
            })
            .send()
            .await?;

        debug!("Sync requested for application {}", name);
        self.handle_response(response).await
    }

    /// Run a named resource action (e.g. "promote-full", "abort") on a resource
    pub async fn run_resource_action(
        &self,
        application: &str,
        target: &ResourceActionTarget,
        action: &str,
    ) -> Result<()> {
        let url = self.url(&format!(
            "/api/v1/applications/{}/resource/actions",
            application
        ));
        let response = self
            .authorize(self.client.post(&url))
            .query(&[
                ("namespace", target.namespace.as_str()),
                ("resourceName", target.resource_name.as_str()),
                ("group", target.group.as_str()),
                ("version", target.version.as_str()),
                ("kind", target.kind.as_str()),
            ])
            .json(&action)
            .send()
            .await?;

        self.handle_text_response(response).await?;
        debug!(
            "Resource action {} applied to {}/{} in {}",
            action, target.kind, target.resource_name, application
        );
        Ok(())
    }

    // =============================================================================
    // Pod Logs
    // =============================================================================

    /// Get the recent logs of one pod of an application
    ///
    /// The controller answers with newline-delimited JSON envelopes; their
    /// `content` fields are joined with newlines. Undecodable lines are skipped.
    /// An empty `namespace` is left out and resolved by the controller.
    pub async fn get_pod_logs(&self, application: &str, namespace: &str, pod: &str) -> Result<String> {
        let url = self.url(&format!(
            "/api/v1/applications/{}/pods/{}/logs",
            application, pod
        ));
        let tail_lines = POD_LOG_TAIL_LINES.to_string();
        let mut request = self
            .authorize(self.client.get(&url))
            .query(&[("follow", "false"), ("tailLines", tail_lines.as_str())]);
        if !namespace.is_empty() {
            request = request.query(&[("namespace", namespace)]);
        }
        let response = request.send().await?;

        let body = self.handle_text_response(response).await?;
        Ok(parse_pod_log_stream(&body))
    }
}

fn parse_pod_log_stream(body: &str) -> String {
    body.lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<PodLogEnvelope>(line) {
            Ok(envelope) => envelope.result.map(|entry| entry.content),
            Err(e) => {
                warn!("Skipping undecodable pod log line: {}", e);
                None
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
