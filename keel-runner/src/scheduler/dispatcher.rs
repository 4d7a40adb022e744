//! Trigger dispatcher
//!
//! Polls the trigger source and runs each trigger on its own task, bounded by
//! a worker pool. A worker holds its permit until the run published its
//! terminal sequence, log streaming included.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::context::RunContext;
use crate::repository::{Trigger, TriggerSource};
use crate::service::TriggerHandler;

const SHUTDOWN_MESSAGE: &str = "Runner shutting down";

/// Dispatcher that continuously consumes triggers and runs them
pub struct Dispatcher {
    poll_interval: Duration,
    max_parallel_runs: u32,
    source: Arc<dyn TriggerSource>,
    handler: Arc<TriggerHandler>,
    semaphore: Arc<Semaphore>,
}

impl Dispatcher {
    /// Creates a new dispatcher
    pub fn new(
        config: &Config,
        source: Arc<dyn TriggerSource>,
        handler: Arc<TriggerHandler>,
    ) -> Self {
        let max_parallel_runs = u32::try_from(config.max_parallel_runs).unwrap_or(u32::MAX);
        Self {
            poll_interval: config.trigger_poll_interval,
            max_parallel_runs,
            source,
            handler,
            semaphore: Arc::new(Semaphore::new(max_parallel_runs as usize)),
        }
    }

    /// Runs the dispatch loop until `cancel` fires, then waits for in-flight runs
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        info!(
            "Starting trigger dispatcher (interval: {:?}, workers: {})",
            self.poll_interval, self.max_parallel_runs
        );

        let mut interval = time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            debug!("Polling for triggers");

            match self.dispatch_once(&cancel).await {
                Ok(dispatched) => {
                    if dispatched > 0 {
                        info!("Dispatched {} run(s) this cycle", dispatched);
                    }
                }
                Err(e) => {
                    error!("Error during dispatch cycle: {:#}", e);
                }
            }
        }

        self.drain().await;
        Ok(())
    }

    /// Performs a single fetch-and-dispatch cycle
    ///
    /// Waits for a free worker per trigger. Triggers still waiting when the
    /// runner shuts down are failed rather than dropped.
    pub async fn dispatch_once(&self, cancel: &CancellationToken) -> Result<usize> {
        let triggers = self
            .source
            .fetch()
            .await
            .context("Failed to fetch triggers")?;

        if triggers.is_empty() {
            debug!("No triggers available");
            return Ok(0);
        }

        let mut dispatched = 0;
        let mut pending = triggers.into_iter();

        while let Some(trigger) = pending.next() {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.reject(trigger).await;
                    for trigger in pending {
                        self.reject(trigger).await;
                    }
                    return Ok(dispatched);
                }
                permit = self.semaphore.clone().acquire_owned() => {
                    permit.context("Worker pool closed")?
                }
            };

            self.spawn_run(trigger, permit, cancel.clone());
            dispatched += 1;
        }

        Ok(dispatched)
    }

    /// Runs one trigger on its own task
    ///
    /// The run itself executes on a nested task so a panic is observed here
    /// and still produces a failure sequence.
    fn spawn_run(&self, trigger: Trigger, permit: OwnedSemaphorePermit, cancel: CancellationToken) {
        let handler = Arc::clone(&self.handler);
        let fallback = trigger.requires_run().then(|| trigger.to_context());

        tokio::spawn(async move {
            let _permit = permit;

            let run_handler = Arc::clone(&handler);
            let run = tokio::spawn(async move {
                run_handler.handle(trigger, &cancel).await.finished().await
            });

            match run.await {
                Ok(outcome) => match outcome.failure_reason() {
                    Some(reason) => debug!("Run failed: {}", reason),
                    None if outcome.is_success() => debug!("Run succeeded"),
                    None => debug!("Trigger required no run"),
                },
                Err(e) => {
                    error!("Run task panicked: {}", e);
                    if let Some(ctx) = fallback {
                        RunContext::new(ctx, handler.publisher())
                            .report_failure(format!("Run task panicked: {}", e))
                            .await;
                    }
                }
            }
        });
    }

    async fn reject(&self, trigger: Trigger) {
        if !trigger.requires_run() {
            return;
        }

        let ctx = trigger.to_context();
        warn!("Failing undispatched run {} on shutdown", ctx.run_key());
        RunContext::new(ctx, self.handler.publisher())
            .report_failure(SHUTDOWN_MESSAGE)
            .await;
    }

    /// Waits until every worker returned its permit
    async fn drain(&self) {
        let busy = self.max_parallel_runs as usize - self.semaphore.available_permits();
        if busy > 0 {
            info!("Waiting for {} in-flight run(s) to finish", busy);
        }

        match self.semaphore.acquire_many(self.max_parallel_runs).await {
            Ok(_) => info!("Trigger dispatcher stopped"),
            Err(e) => warn!("Worker pool closed while draining: {}", e),
        }
    }
}
