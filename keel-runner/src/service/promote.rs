//! Promote/abort executor
//!
//! Resolves the decision taken at an approval gate into a resource action on
//! the deploy step's progressive rollout. Events are reported against the
//! approval gate step and follow the same lifecycle as a sync.

use anyhow::{Context, Result};
use keel_client::ResourceActionTarget;
use keel_core::domain::run::RunState;
use keel_core::domain::tool::ToolConfig;
use keel_core::dto::trigger::{PromoteDecision, PromoteTrigger};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::context::RunContext;
use crate::execution::ExecutionOutcome;
use crate::repository::{ConfigResolver, GitOpsApi};

use super::session::ToolSessions;
use super::sync::resolve_run_count;

const ROLLOUT_KIND: &str = "Rollout";

/// Executes promote and abort decisions
pub struct PromoteExecutor {
    settings: Arc<dyn ConfigResolver>,
    sessions: Arc<ToolSessions>,
}

impl PromoteExecutor {
    pub fn new(settings: Arc<dyn ConfigResolver>, sessions: Arc<ToolSessions>) -> Self {
        Self { settings, sessions }
    }

    pub async fn execute(
        &self,
        mut run: RunContext,
        trigger: &PromoteTrigger,
        cancel: &CancellationToken,
    ) -> ExecutionOutcome {
        if let Err(e) = resolve_run_count(self.settings.as_ref(), &mut run).await {
            return run.report_failure(format!("{:#}", e)).await;
        }

        let tool = match self
            .settings
            .tool_config(&trigger.pipeline_id, &trigger.deploy_step_id)
            .await
            .context("Failed to resolve deploy step configuration")
        {
            Ok(tool) => tool,
            Err(e) => return run.report_failure(format!("{:#}", e)).await,
        };

        let api = match self
            .sessions
            .open(&trigger.customer_id, &tool, Some(&trigger.owner_id))
            .await
        {
            Ok(api) => api,
            Err(e) => return run.report_failure(format!("{:#}", e)).await,
        };

        let (in_progress, completed) = match trigger.status {
            PromoteDecision::Approved => ("Promote in Progress", "Promote Completed"),
            PromoteDecision::Rejected | PromoteDecision::Aborted => {
                ("Abort in Progress", "Abort Completed")
            }
        };

        run.advance(RunState::Syncing);
        run.report_running(in_progress).await;

        let action = trigger.resource_action();
        let applied = tokio::select! {
            _ = cancel.cancelled() => Err(anyhow::anyhow!("Sync cancelled")),
            result = apply_action(api.as_ref(), &tool, action) => result,
        };
        if let Err(e) = applied {
            return run.report_failure(format!("{:#}", e)).await;
        }

        info!(
            "Ran {} on {} for run {}",
            action,
            tool.application_name,
            run.ctx().run_key()
        );

        if run.report_success(completed).await {
            run.complete_stream().await;
        }
        ExecutionOutcome::Succeeded { log_stream: None }
    }
}

async fn apply_action(api: &dyn GitOpsApi, tool: &ToolConfig, action: &str) -> Result<()> {
    let target = rollout_target(api, tool).await?;
    api.run_resource_action(&tool.application_name, &target, action)
        .await
}

/// Locates the rollout resource of the deploy step
///
/// The configured name and namespace win; otherwise the namespace is read from
/// the rollout node of the application's resource tree.
async fn rollout_target(api: &dyn GitOpsApi, tool: &ToolConfig) -> Result<ResourceActionTarget> {
    let name = tool
        .rollout_name
        .clone()
        .unwrap_or_else(|| tool.application_name.clone());

    if let Some(namespace) = &tool.rollout_namespace {
        return Ok(ResourceActionTarget::rollout(namespace.clone(), name));
    }

    let tree = api.get_resource_tree(&tool.application_name).await?;
    let namespace = tree
        .nodes
        .iter()
        .filter(|node| node.kind == ROLLOUT_KIND)
        .find(|node| node.name == name)
        .and_then(|node| node.namespace.clone())
        .ok_or_else(|| {
            anyhow::anyhow!(
                "Rollout {} not found in application {}",
                name,
                tool.application_name
            )
        })?;

    Ok(ResourceActionTarget::rollout(namespace, name))
}
