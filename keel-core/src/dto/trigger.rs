//! Inbound trigger messages

use serde::{Deserialize, Serialize};

use crate::domain::run::{PipelineRunContext, RunAction};

/// Request to run the sync step of a pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncTrigger {
    pub pipeline_id: String,
    #[serde(default)]
    pub job_id: Option<String>,
    pub customer_id: String,
    pub step_id: String,
    pub action: RunAction,
}

impl SyncTrigger {
    /// Builds the run context for this trigger
    pub fn to_context(&self) -> PipelineRunContext {
        let mut ctx = PipelineRunContext::new(
            self.pipeline_id.clone(),
            self.step_id.clone(),
            self.customer_id.clone(),
            self.action,
        );
        ctx.job_id = self.job_id.clone();
        ctx
    }
}

/// Approval gate decision carried by a promote trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PromoteDecision {
    Approved,
    Rejected,
    #[serde(other)]
    Aborted,
}

/// Request to promote or abort a progressive rollout after an approval gate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromoteTrigger {
    pub pipeline_id: String,
    pub deploy_step_id: String,
    pub approval_gate_step_id: String,
    pub status: PromoteDecision,
    pub customer_id: String,
    pub owner_id: String,
}

impl PromoteTrigger {
    /// Builds the run context; events are reported against the approval gate step
    pub fn to_context(&self) -> PipelineRunContext {
        PipelineRunContext::new(
            self.pipeline_id.clone(),
            self.approval_gate_step_id.clone(),
            self.customer_id.clone(),
            RunAction::Start,
        )
    }

    /// Resource action run against the rollout
    pub fn resource_action(&self) -> &'static str {
        match self.status {
            PromoteDecision::Approved => "promote-full",
            PromoteDecision::Rejected | PromoteDecision::Aborted => "abort",
        }
    }
}
