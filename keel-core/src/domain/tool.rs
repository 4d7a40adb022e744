//! Tool configuration domain types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Git source of the manifests deployed by a step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitSource {
    pub url: String,
    pub branch: String,
    #[serde(default)]
    pub path: String,
}

/// Resolved per-step configuration
///
/// Immutable once resolved from the configuration service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolConfig {
    pub application_name: String,
    /// Reference to the GitOps tool registration
    pub tool_id: String,
    pub git: GitSource,
    #[serde(default)]
    pub image_reference: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    /// Reference to the cluster registration used by preparation jobs
    #[serde(default)]
    pub cluster_id: Option<String>,
    /// Reference to the git credential registration used by preparation jobs
    #[serde(default)]
    pub git_tool_id: Option<String>,
    /// Carried through for consumers of the step configuration; the runner does not act on it
    #[serde(default)]
    pub two_factor: bool,
    /// Carried through for consumers of the step configuration; the runner does not act on it
    #[serde(default)]
    pub secret_token: bool,
    /// Rollout resource targeted by promote/abort
    #[serde(default)]
    pub rollout_name: Option<String>,
    #[serde(default)]
    pub rollout_namespace: Option<String>,
}

impl ToolConfig {
    /// Whether manifests must be prepared in the target cluster before syncing
    pub fn requires_preparation(&self) -> bool {
        self.cluster_id.is_some()
    }
}

/// Indirection to a secret held in the secret store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultKeyRef {
    /// Empty when the secret belongs to the registration's owner
    #[serde(default)]
    pub owner_id: String,
    pub key: String,
}

/// Connection info for a registered tool (GitOps controller, git host, cluster)
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDetails {
    pub url: String,
    #[serde(default)]
    pub username: String,
    pub owner: String,
    pub vault_key: VaultKeyRef,
}

impl ToolDetails {
    /// Owner the secret is stored under
    ///
    /// The vault key's own owner wins; registrations whose key carries none
    /// fall back to the registration's owner.
    pub fn secret_owner(&self) -> &str {
        if self.vault_key.owner_id.is_empty() {
            &self.owner
        } else {
            &self.vault_key.owner_id
        }
    }
}

impl fmt::Debug for ToolDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDetails")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("owner", &self.owner)
            .field("vault_key", &self.vault_key.key)
            .finish()
    }
}

/// Target cluster for a preparation job
#[derive(Clone, PartialEq, Eq)]
pub struct ClusterTarget {
    pub server_url: String,
    pub token: String,
}

impl fmt::Debug for ClusterTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterTarget")
            .field("server_url", &self.server_url)
            .field("token", &"<redacted>")
            .finish()
    }
}
