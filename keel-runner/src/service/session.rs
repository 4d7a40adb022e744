//! Tool credential resolution
//!
//! Follows the owner/key indirection of a tool registration to the secret
//! store and opens authenticated GitOps sessions. Secrets are only held in
//! memory for the duration of the call that needs them.

use anyhow::{Context, Result};
use keel_core::domain::tool::{ToolConfig, ToolDetails};
use std::sync::Arc;
use tracing::debug;

use crate::repository::{ConfigResolver, GitOpsApi, GitOpsConnector, SecretResolver};

/// Resolves tool registrations and their credentials
pub struct ToolSessions {
    settings: Arc<dyn ConfigResolver>,
    secrets: Arc<dyn SecretResolver>,
    connector: Arc<dyn GitOpsConnector>,
}

impl ToolSessions {
    pub fn new(
        settings: Arc<dyn ConfigResolver>,
        secrets: Arc<dyn SecretResolver>,
        connector: Arc<dyn GitOpsConnector>,
    ) -> Self {
        Self {
            settings,
            secrets,
            connector,
        }
    }

    /// Resolves a tool registration and its secret
    ///
    /// # Arguments
    /// * `customer_id` - Customer owning the registration
    /// * `tool_id` - Registration to resolve
    /// * `owner_override` - Secret owner to use instead of the registration's
    pub async fn credentials(
        &self,
        customer_id: &str,
        tool_id: &str,
        owner_override: Option<&str>,
    ) -> Result<(ToolDetails, String)> {
        let details = self
            .settings
            .tool_details(customer_id, tool_id)
            .await
            .with_context(|| format!("Failed to resolve tool {}", tool_id))?;

        let owner = owner_override.unwrap_or(details.secret_owner());
        let secret = self
            .secrets
            .get_secret(owner, &details.vault_key.key)
            .await
            .with_context(|| format!("Failed to resolve credentials of tool {}", tool_id))?;

        debug!("Resolved credentials of tool {} ({})", tool_id, details.url);
        Ok((details, secret))
    }

    /// Opens a session against the GitOps controller configured for a step
    pub async fn open(
        &self,
        customer_id: &str,
        tool: &ToolConfig,
        owner_override: Option<&str>,
    ) -> Result<Arc<dyn GitOpsApi>> {
        let (details, password) = self
            .credentials(customer_id, &tool.tool_id, owner_override)
            .await?;

        self.connector.connect(&details, &password).await
    }
}
