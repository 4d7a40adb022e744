//! Outbound event topics

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::application::Application;
use crate::domain::run::PipelineRunContext;

/// Event bus topics written by the sync services
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Machine-consumable step status
    PipelineResponse,
    /// Durable status record
    PipelineStatus,
    /// Human-readable log stream, terminated by an empty `COMPLETED` event
    PipelineConsoleLog,
    /// Post-run application snapshot for analytics
    ApplicationSnapshot,
}

impl Topic {
    pub fn name(self) -> &'static str {
        match self {
            Topic::PipelineResponse => "pipeline-response",
            Topic::PipelineStatus => "pipeline-status",
            Topic::PipelineConsoleLog => "pipeline-console-log",
            Topic::ApplicationSnapshot => "gitops-application-snapshot",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Compact application state published after a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSnapshot {
    pub pipeline_id: String,
    pub step_id: String,
    pub customer_id: String,
    pub run_count: u64,
    pub application_name: String,
    pub sync_status: String,
    #[serde(default)]
    pub health_status: Option<String>,
    #[serde(default)]
    pub revision: Option<String>,
    pub captured_at: chrono::DateTime<chrono::Utc>,
}

impl ApplicationSnapshot {
    pub fn capture(ctx: &PipelineRunContext, app: &Application) -> Self {
        Self {
            pipeline_id: ctx.pipeline_id.clone(),
            step_id: ctx.step_id.clone(),
            customer_id: ctx.customer_id.clone(),
            run_count: ctx.run_count,
            application_name: app.name().to_string(),
            sync_status: format!("{:?}", app.sync_result().status),
            health_status: app.status.health.status.clone(),
            revision: app.sync_result().revision.clone(),
            captured_at: chrono::Utc::now(),
        }
    }
}
