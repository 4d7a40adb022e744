//! Sync executor
//!
//! Drives one sync step: resolves the run counter and controller session,
//! triggers the sync, waits for the operation to settle and hands the
//! successful run to the log streamer. Every failure funnels into the run
//! context's single failure path.

use anyhow::{Context, Result};
use keel_core::domain::run::RunState;
use keel_core::domain::tool::ToolConfig;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::context::RunContext;
use crate::execution::ExecutionOutcome;
use crate::repository::{ConfigResolver, GitOpsApi};

use super::log_streamer::LogStreamer;
use super::poller::{OperationPoller, PollOutcome};
use super::session::ToolSessions;

const SYNC_IN_PROGRESS: &str = "Sync in Progress";
const SYNC_COMPLETED: &str = "Sync Completed";

/// Executes sync steps
pub struct SyncExecutor {
    settings: Arc<dyn ConfigResolver>,
    sessions: Arc<ToolSessions>,
    poller: OperationPoller,
    streamer: LogStreamer,
}

impl SyncExecutor {
    pub fn new(
        settings: Arc<dyn ConfigResolver>,
        sessions: Arc<ToolSessions>,
        poller: OperationPoller,
    ) -> Self {
        Self {
            settings,
            sessions,
            poller,
            streamer: LogStreamer::new(),
        }
    }

    /// Runs a sync step to its terminal sequence
    ///
    /// Log streaming of a successful run continues on its own task; the returned
    /// outcome carries its handle.
    pub async fn execute(
        &self,
        mut run: RunContext,
        tool: &ToolConfig,
        cancel: &CancellationToken,
    ) -> ExecutionOutcome {
        if let Err(e) = resolve_run_count(self.settings.as_ref(), &mut run).await {
            return run.report_failure(format!("{:#}", e)).await;
        }

        self.execute_resolved(run, tool, cancel).await
    }

    /// Runs a sync step whose run counter is already attached
    pub async fn execute_resolved(
        &self,
        run: RunContext,
        tool: &ToolConfig,
        cancel: &CancellationToken,
    ) -> ExecutionOutcome {
        let customer_id = run.ctx().customer_id.clone();
        let api = match self.sessions.open(&customer_id, tool, None).await {
            Ok(api) => api,
            Err(e) => return run.report_failure(format!("{:#}", e)).await,
        };

        self.sync_with(api, run, tool, cancel).await
    }

    /// Triggers the sync on an open session and follows it to completion
    pub async fn sync_with(
        &self,
        api: Arc<dyn GitOpsApi>,
        mut run: RunContext,
        tool: &ToolConfig,
        cancel: &CancellationToken,
    ) -> ExecutionOutcome {
        let application = tool.application_name.clone();
        run.advance(RunState::Syncing);
        info!(
            "Syncing application {} for run {}",
            application,
            run.ctx().run_key()
        );

        let synced = tokio::select! {
            _ = cancel.cancelled() => return run.report_failure("Sync cancelled").await,
            result = api.sync_application(&application) => result,
        };
        if let Err(e) = synced {
            return run.report_failure(format!("{:#}", e)).await;
        }

        run.report_running(SYNC_IN_PROGRESS).await;
        run.advance(RunState::Polling);

        match self.poller.poll(api.as_ref(), &application, cancel).await {
            PollOutcome::Synced { state, result } => {
                info!(
                    "Application {} synced at revision {:?} ({:?})",
                    application, result.revision, state.finished_at
                );

                if !run.report_success(SYNC_COMPLETED).await {
                    error!("Run {} finished twice", run.ctx().run_key());
                    return ExecutionOutcome::Failed {
                        reason: "Terminal status already reported".to_string(),
                    };
                }

                let streamer = self.streamer.clone();
                let log_stream = tokio::spawn(async move {
                    streamer.stream(api.as_ref(), &application, run).await;
                });

                ExecutionOutcome::Succeeded {
                    log_stream: Some(log_stream),
                }
            }
            PollOutcome::Failed { reason } => run.report_failure(reason).await,
        }
    }
}

/// Attaches the step's run counter to the context
pub(crate) async fn resolve_run_count(
    settings: &dyn ConfigResolver,
    run: &mut RunContext,
) -> Result<()> {
    let count = settings
        .run_count(&run.ctx().pipeline_id, &run.ctx().step_id)
        .await
        .context("Failed to resolve run count")?;

    run.ctx_mut().run_count = count;
    Ok(())
}
