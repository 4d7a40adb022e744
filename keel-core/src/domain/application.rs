//! GitOps application domain types
//!
//! Typed views over the controller's application, operation and resource-tree
//! payloads. Every struct tolerates unknown fields and missing optional ones, so
//! controller upgrades that add fields do not break deserialization.

use serde::{Deserialize, Serialize};

/// Coarse progress of an in-flight sync operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationPhase {
    Running,
    Succeeded,
    Error,
    #[serde(other)]
    Unknown,
}

/// Whether live state matches the declared source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SyncStatus {
    Synced,
    OutOfSync,
    #[default]
    #[serde(other)]
    Unknown,
}

/// Operation state as reported on one poll
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationState {
    pub phase: OperationPhase,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub finished_at: Option<String>,
}

/// Sync status paired with the operation state to decide the real outcome
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOperationResult {
    #[serde(default)]
    pub status: SyncStatus,
    #[serde(default)]
    pub revision: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationStatus {
    #[serde(default)]
    pub sync: SyncOperationResult,
    #[serde(default)]
    pub health: HealthStatus,
    #[serde(default)]
    pub operation_state: Option<OperationState>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationMetadata {
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
}

/// Cluster and namespace the application deploys into
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationDestination {
    #[serde(default)]
    pub server: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSpec {
    #[serde(default)]
    pub destination: ApplicationDestination,
}

/// Application as returned by the controller
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub metadata: ApplicationMetadata,
    #[serde(default)]
    pub spec: ApplicationSpec,
    #[serde(default)]
    pub status: ApplicationStatus,
}

impl Application {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn operation_state(&self) -> Option<&OperationState> {
        self.status.operation_state.as_ref()
    }

    pub fn sync_result(&self) -> &SyncOperationResult {
        &self.status.sync
    }

    /// Namespace the application's workloads are deployed into
    pub fn destination_namespace(&self) -> Option<&str> {
        self.spec.destination.namespace.as_deref()
    }
}

/// Application list wrapper
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplicationList {
    #[serde(default)]
    pub items: Option<Vec<Application>>,
}

/// One `info` entry of a resource node (e.g. `{"name":"Status Reason","value":"Running"}`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoItem {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub value: String,
}

/// A node of the live resource graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceNode {
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub info: Vec<InfoItem>,
}

impl ResourceNode {
    pub fn is_pod(&self) -> bool {
        self.kind == "Pod"
    }

    /// True when any info entry carries the `Running` status marker
    pub fn is_running(&self) -> bool {
        self.info.iter().any(|item| item.value == "Running")
    }
}

/// Live resource graph of an application
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResourceTree {
    #[serde(default)]
    pub nodes: Vec<ResourceNode>,
}

impl ResourceTree {
    /// All pod nodes, in tree order
    pub fn pods(&self) -> impl Iterator<Item = &ResourceNode> {
        self.nodes.iter().filter(|node| node.is_pod())
    }

    /// Pods observed in the `Running` state
    pub fn running_pods(&self) -> Vec<&ResourceNode> {
        self.pods().filter(|node| node.is_running()).collect()
    }

    /// Namespace of the first pod in the tree
    pub fn first_pod_namespace(&self) -> Option<&str> {
        self.pods().find_map(|node| node.namespace.as_deref())
    }
}

/// One line of the controller's streamed pod log
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodLogEntry {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub time_stamp: Option<String>,
    #[serde(default)]
    pub pod_name: Option<String>,
}

/// Newline-delimited envelope wrapping each pod log line
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PodLogEnvelope {
    #[serde(default)]
    pub result: Option<PodLogEntry>,
}
