//! Run context for one pipeline-step invocation
//!
//! Owns the `PipelineRunContext`, tracks the sync state machine and publishes
//! every event of the run. Events carry a snapshot copy of the context, so the
//! context itself never leaves the task driving the run.
//!
//! Exactly one terminal sequence is published per run:
//! - success: `SUCCESS` on response and status, console chunks, then an empty
//!   `COMPLETED` console event (`report_success` + `complete_stream`)
//! - failure: `FAILED` on response and status, then a `COMPLETED` console event
//!   carrying the failure marker (`report_failure`)

use keel_core::domain::run::{PipelineRunContext, RunState, RunStatus};
use keel_core::dto::event::Topic;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::execution::ExecutionOutcome;
use crate::repository::EventPublisher;

/// Message published on the response and status topics when a run fails
pub const SYNC_FAILED_MESSAGE: &str = "Sync Failed";

/// Console payload closing the log stream of a failed run
pub const CONSOLE_FAILURE_MARKER: &str = "Sync failed, see pipeline status for details";

/// Execution context of one invocation
pub struct RunContext {
    ctx: PipelineRunContext,
    state: RunState,
    terminal_reported: bool,
    publisher: Arc<dyn EventPublisher>,
}

impl RunContext {
    /// Creates a run context in the `Created` state
    pub fn new(ctx: PipelineRunContext, publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            ctx,
            state: RunState::Created,
            terminal_reported: false,
            publisher,
        }
    }

    pub fn ctx(&self) -> &PipelineRunContext {
        &self.ctx
    }

    pub fn ctx_mut(&mut self) -> &mut PipelineRunContext {
        &mut self.ctx
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Moves the state machine forward
    pub fn advance(&mut self, next: RunState) {
        if self.state.is_terminal() {
            warn!(
                "Run {} is already completed, ignoring transition to {:?}",
                self.ctx.run_key(),
                next
            );
            return;
        }
        debug!("Run {}: {:?} -> {:?}", self.ctx.run_key(), self.state, next);
        self.state = next;
    }

    /// Publishes `RUNNING` on the response and status topics
    pub async fn report_running(&mut self, message: &str) {
        self.ctx.set_status(RunStatus::Running, message);
        self.ctx.console_log = None;

        let snapshot = self.ctx.clone();
        self.publish(Topic::PipelineResponse, &snapshot).await;
        self.publish(Topic::PipelineStatus, &snapshot).await;
    }

    /// Publishes one chunk of human-readable output
    pub async fn log_console(&self, chunk: impl Into<String>) {
        if self.state.is_terminal() {
            warn!("Run {} is completed, dropping console output", self.ctx.run_key());
            return;
        }

        let mut snapshot = self.ctx.clone();
        snapshot.status = Some(RunStatus::Running);
        snapshot.console_log = Some(chunk.into());
        snapshot.timestamp = chrono::Utc::now();
        self.publish(Topic::PipelineConsoleLog, &snapshot).await;
    }

    /// Publishes `SUCCESS` on the response and status topics
    ///
    /// Opens the success branch; the run is finished by `complete_stream`.
    /// Returns false (and publishes nothing) if a terminal sequence was already
    /// started.
    pub async fn report_success(&mut self, message: &str) -> bool {
        if self.terminal_reported {
            error!(
                "Run {} already reported a terminal status, not reporting success",
                self.ctx.run_key()
            );
            return false;
        }
        self.terminal_reported = true;

        self.ctx.set_status(RunStatus::Success, message);
        self.ctx.console_log = None;
        self.ctx.error = None;

        let snapshot = self.ctx.clone();
        self.publish(Topic::PipelineResponse, &snapshot).await;
        self.publish(Topic::PipelineStatus, &snapshot).await;

        info!("Run {} succeeded: {}", self.ctx.run_key(), message);
        self.advance(RunState::Streaming);
        true
    }

    /// Publishes the empty `COMPLETED` console event closing a successful run
    pub async fn complete_stream(mut self) {
        if self.state.is_terminal() {
            warn!("Run {} already completed", self.ctx.run_key());
            return;
        }

        let mut snapshot = self.ctx.clone();
        snapshot.status = Some(RunStatus::Completed);
        snapshot.console_log = Some(String::new());
        snapshot.timestamp = chrono::Utc::now();
        self.publish(Topic::PipelineConsoleLog, &snapshot).await;

        self.advance(RunState::Completed);
    }

    /// Publishes the failure sequence and finishes the run
    ///
    /// The detailed `reason` is logged and returned in the outcome; the event
    /// bus only receives the generic failure message. The three publishes are
    /// issued in order: response, status, console.
    pub async fn report_failure(mut self, reason: impl Into<String>) -> ExecutionOutcome {
        let reason = reason.into();

        if self.terminal_reported {
            error!(
                "Run {} already reported a terminal status, suppressing failure: {}",
                self.ctx.run_key(),
                reason
            );
            return ExecutionOutcome::Failed { reason };
        }
        self.terminal_reported = true;

        error!("Run {} failed: {}", self.ctx.run_key(), reason);

        self.ctx.set_status(RunStatus::Failed, SYNC_FAILED_MESSAGE);
        self.ctx.error = Some(SYNC_FAILED_MESSAGE.to_string());
        self.ctx.console_log = None;

        let snapshot = self.ctx.clone();
        self.publish(Topic::PipelineResponse, &snapshot).await;
        self.publish(Topic::PipelineStatus, &snapshot).await;

        let mut console = snapshot;
        console.status = Some(RunStatus::Completed);
        console.console_log = Some(CONSOLE_FAILURE_MARKER.to_string());
        self.publish(Topic::PipelineConsoleLog, &console).await;

        self.advance(RunState::Completed);
        ExecutionOutcome::Failed { reason }
    }

    /// Publishes a snapshot; failures are logged and never escalate
    async fn publish(&self, topic: Topic, snapshot: &PipelineRunContext) {
        let payload = match serde_json::to_value(snapshot) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to serialize event for {}: {}", topic, e);
                return;
            }
        };

        if let Err(e) = self.publisher.publish(topic, payload).await {
            warn!(
                "Failed to publish {} event for run {}: {:#}",
                topic,
                self.ctx.run_key(),
                e
            );
        }
    }
}
