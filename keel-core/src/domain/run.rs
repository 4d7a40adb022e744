//! Pipeline run domain types

use serde::{Deserialize, Serialize};

/// Action requested for a pipeline step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunAction {
    Start,
    Delete,
}

/// Status reported to the pipeline engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Running,
    Success,
    Failed,
    Completed,
}

/// Progress of one invocation through the sync state machine
///
/// `Completed` is terminal and is reached exactly once, through either the
/// success or the failure branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Created,
    Syncing,
    Polling,
    Streaming,
    Completed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Completed)
    }
}

/// Identity and reportable state of one pipeline-step invocation
///
/// Owned by the task running the invocation. Events carry a serialized snapshot
/// of it, so it is never shared between tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRunContext {
    pub pipeline_id: String,
    pub step_id: String,
    pub customer_id: String,
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub run_count: u64,
    pub action: RunAction,
    #[serde(default)]
    pub status: Option<RunStatus>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub console_log: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub pod_name: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl PipelineRunContext {
    /// Creates a fresh context for a step invocation
    pub fn new(
        pipeline_id: impl Into<String>,
        step_id: impl Into<String>,
        customer_id: impl Into<String>,
        action: RunAction,
    ) -> Self {
        Self {
            pipeline_id: pipeline_id.into(),
            step_id: step_id.into(),
            customer_id: customer_id.into(),
            job_id: None,
            run_count: 0,
            action,
            status: None,
            message: None,
            console_log: None,
            error: None,
            pod_name: None,
            namespace: None,
            timestamp: chrono::Utc::now(),
        }
    }

    /// Sets status and message and refreshes the timestamp
    pub fn set_status(&mut self, status: RunStatus, message: impl Into<String>) {
        self.status = Some(status);
        self.message = Some(message.into());
        self.timestamp = chrono::Utc::now();
    }

    /// Short identifier used in log lines
    pub fn run_key(&self) -> String {
        format!("{}/{}#{}", self.pipeline_id, self.step_id, self.run_count)
    }
}
