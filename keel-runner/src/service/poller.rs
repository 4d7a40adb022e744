//! Operation poller
//!
//! Polls the operation state of one application at a fixed interval until it
//! reaches a terminal phase, the wall-clock ceiling passes, or the run is
//! cancelled. Every exit from the loop yields a `PollOutcome`; the poller never
//! waits past its ceiling.

use keel_core::domain::application::{
    OperationPhase, OperationState, SyncOperationResult, SyncStatus,
};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::repository::GitOpsApi;

/// Terminal result of polling one operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Operation succeeded and the application is in sync
    Synced {
        state: OperationState,
        result: SyncOperationResult,
    },
    /// Operation failed, timed out, was cancelled or could not be observed
    Failed { reason: String },
}

impl PollOutcome {
    fn failed(reason: impl Into<String>) -> Self {
        PollOutcome::Failed {
            reason: reason.into(),
        }
    }
}

/// Fixed-interval poller with a wall-clock ceiling
#[derive(Debug, Clone)]
pub struct OperationPoller {
    interval: Duration,
    timeout: Duration,
}

impl OperationPoller {
    /// Creates a poller
    ///
    /// # Arguments
    /// * `interval` - Delay between two status queries
    /// * `timeout` - Ceiling after which a non-terminal operation is a failure
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    fn timeout_reason(&self) -> String {
        format!(
            "Sync did not reach a terminal phase within {}s",
            self.timeout.as_secs()
        )
    }

    /// Polls until the operation of `application` is terminal
    ///
    /// Status queries share the ceiling: a query still in flight when the
    /// ceiling passes is abandoned and reported as a timeout. A query error is
    /// reported immediately and is not retried.
    pub async fn poll(
        &self,
        api: &dyn GitOpsApi,
        application: &str,
        cancel: &CancellationToken,
    ) -> PollOutcome {
        let deadline = Instant::now() + self.timeout;
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            let remaining = deadline.saturating_duration_since(Instant::now());

            let app = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Polling of {} cancelled after {} attempt(s)", application, attempts);
                    return PollOutcome::failed("Sync cancelled");
                }
                result = tokio::time::timeout(remaining, api.get_application(application)) => {
                    match result {
                        Ok(Ok(app)) => app,
                        Ok(Err(e)) => {
                            warn!("Failed to query operation status of {}: {:#}", application, e);
                            return PollOutcome::failed(format!(
                                "Failed to query operation status: {:#}",
                                e
                            ));
                        }
                        Err(_) => return PollOutcome::failed(self.timeout_reason()),
                    }
                }
            };

            if let Some(outcome) = classify(app.operation_state(), app.sync_result()) {
                info!(
                    "Operation of {} is terminal after {} attempt(s): {:?}",
                    application, attempts, outcome
                );
                return outcome;
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(
                    "Operation of {} still running after {}s",
                    application,
                    self.timeout.as_secs()
                );
                return PollOutcome::failed(self.timeout_reason());
            }

            debug!(
                "Operation of {} still running (attempt {}), next check in {:?}",
                application, attempts, self.interval
            );

            let wait = self.interval.min(deadline - now);
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Polling of {} cancelled after {} attempt(s)", application, attempts);
                    return PollOutcome::failed("Sync cancelled");
                }
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}

/// Maps one observation to a terminal outcome, or `None` to keep polling
///
/// A missing operation state means the controller has not published the
/// operation yet and is treated like `Running`.
pub fn classify(
    state: Option<&OperationState>,
    result: &SyncOperationResult,
) -> Option<PollOutcome> {
    let state = state?;

    match state.phase {
        OperationPhase::Running => None,
        OperationPhase::Succeeded if result.status == SyncStatus::Synced => {
            Some(PollOutcome::Synced {
                state: state.clone(),
                result: result.clone(),
            })
        }
        OperationPhase::Succeeded => {
            warn!(
                "Sync operation succeeded but application is {:?}",
                result.status
            );
            Some(PollOutcome::failed(format!(
                "Sync operation succeeded but application is {:?}",
                result.status
            )))
        }
        OperationPhase::Error => {
            let reason = state
                .message
                .as_deref()
                .filter(|m| !m.trim().is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("Sync status: {:?}", result.status));
            Some(PollOutcome::failed(reason))
        }
        OperationPhase::Unknown => Some(PollOutcome::failed("Unknown state received")),
    }
}
