//! Execution outcome of a pipeline-step invocation
//!
//! Only exists at runtime; the event bus is the durable record of a run.

use tokio::task::JoinHandle;
use tracing::warn;

/// Result of driving one invocation to its terminal state
#[derive(Debug)]
pub enum ExecutionOutcome {
    /// The success sequence was published
    ///
    /// Pod log streaming may still be running on its own task; awaiting the
    /// handle waits for the closing `COMPLETED` console event.
    Succeeded { log_stream: Option<JoinHandle<()>> },
    /// The failure sequence was published
    Failed { reason: String },
    /// The trigger required no work (e.g. a non-START action)
    Skipped,
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Succeeded { .. })
    }

    /// Failure reason, if the run failed
    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            ExecutionOutcome::Failed { reason } => Some(reason),
            _ => None,
        }
    }

    /// Waits for background log streaming to finish
    pub async fn finished(self) -> Self {
        match self {
            ExecutionOutcome::Succeeded {
                log_stream: Some(handle),
            } => {
                if let Err(e) = handle.await {
                    warn!("Log streaming task panicked: {}", e);
                }
                ExecutionOutcome::Succeeded { log_stream: None }
            }
            other => other,
        }
    }
}
