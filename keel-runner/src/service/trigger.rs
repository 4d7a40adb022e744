//! Trigger routing
//!
//! Turns an inbound trigger into a run context and hands it to the executor
//! matching the step's configuration.

use anyhow::Context;
use keel_core::domain::run::RunAction;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::context::RunContext;
use crate::execution::ExecutionOutcome;
use crate::repository::{ConfigResolver, EventPublisher, Trigger};

use super::prepare::PreparationJobExecutor;
use super::promote::PromoteExecutor;
use super::sync::SyncExecutor;

/// Routes triggers to executors
pub struct TriggerHandler {
    settings: Arc<dyn ConfigResolver>,
    publisher: Arc<dyn EventPublisher>,
    sync: Arc<SyncExecutor>,
    prepare: Arc<PreparationJobExecutor>,
    promote: Arc<PromoteExecutor>,
}

impl TriggerHandler {
    pub fn new(
        settings: Arc<dyn ConfigResolver>,
        publisher: Arc<dyn EventPublisher>,
        sync: Arc<SyncExecutor>,
        prepare: Arc<PreparationJobExecutor>,
        promote: Arc<PromoteExecutor>,
    ) -> Self {
        Self {
            settings,
            publisher,
            sync,
            prepare,
            promote,
        }
    }

    /// Publisher shared by every run created from a trigger
    pub fn publisher(&self) -> Arc<dyn EventPublisher> {
        self.publisher.clone()
    }

    /// Runs one trigger to its terminal sequence
    pub async fn handle(&self, trigger: Trigger, cancel: &CancellationToken) -> ExecutionOutcome {
        match trigger {
            Trigger::Sync(trigger) => {
                if trigger.action != RunAction::Start {
                    info!(
                        "Ignoring {:?} trigger for pipeline {} step {}",
                        trigger.action, trigger.pipeline_id, trigger.step_id
                    );
                    return ExecutionOutcome::Skipped;
                }

                let run = RunContext::new(trigger.to_context(), self.publisher.clone());
                let tool = match self
                    .settings
                    .tool_config(&trigger.pipeline_id, &trigger.step_id)
                    .await
                    .context("Failed to resolve step configuration")
                {
                    Ok(tool) => tool,
                    Err(e) => return run.report_failure(format!("{:#}", e)).await,
                };

                if tool.requires_preparation() {
                    debug!("Step {} prepares its manifests first", trigger.step_id);
                    self.prepare.run(run, &tool, cancel).await
                } else {
                    self.sync.execute(run, &tool, cancel).await
                }
            }
            Trigger::Promote(trigger) => {
                let run = RunContext::new(trigger.to_context(), self.publisher.clone());
                self.promote.execute(run, &trigger, cancel).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{OperationPoller, PrepareSettings, ToolSessions};
    use crate::testing::{
        FakeConfig, FakeConnector, FakeSecrets, RecordingPublisher, ScriptedGitOps,
        ScriptedJobRunner,
    };
    use keel_core::domain::run::RunStatus;
    use keel_core::dto::event::Topic;
    use keel_core::dto::trigger::SyncTrigger;
    use std::time::Duration;

    struct Harness {
        api: Arc<ScriptedGitOps>,
        jobs: Arc<ScriptedJobRunner>,
        publisher: Arc<RecordingPublisher>,
        handler: TriggerHandler,
    }

    fn harness(config: FakeConfig) -> Harness {
        let api = Arc::new(ScriptedGitOps::default());
        let jobs = Arc::new(ScriptedJobRunner::exiting(&["done"], 0));
        let config = Arc::new(config);
        let publisher = Arc::new(RecordingPublisher::default());
        let sessions = Arc::new(ToolSessions::new(
            config.clone(),
            Arc::new(
                FakeSecrets::with("argo-password", "pw").and("cluster-password", "cluster-token"),
            ),
            Arc::new(FakeConnector::new(api.clone())),
        ));
        let sync = Arc::new(SyncExecutor::new(
            config.clone(),
            sessions.clone(),
            OperationPoller::new(Duration::from_secs(5), Duration::from_secs(60)),
        ));
        let prepare = Arc::new(PreparationJobExecutor::new(
            config.clone(),
            sessions.clone(),
            jobs.clone(),
            sync.clone(),
            publisher.clone(),
            PrepareSettings {
                control_image: "docker.io/alpine/k8s:1.30.0".to_string(),
                namespace: "default".to_string(),
                timeout: Duration::from_secs(60),
            },
        ));
        let promote = Arc::new(PromoteExecutor::new(config.clone(), sessions));

        Harness {
            api,
            jobs,
            publisher: publisher.clone(),
            handler: TriggerHandler::new(config, publisher, sync, prepare, promote),
        }
    }

    fn sync_trigger(action: RunAction) -> Trigger {
        Trigger::Sync(SyncTrigger {
            pipeline_id: "p1".to_string(),
            job_id: Some("j1".to_string()),
            customer_id: "c1".to_string(),
            step_id: "s1".to_string(),
            action,
        })
    }

    #[tokio::test]
    async fn test_delete_action_is_skipped() {
        let h = harness(FakeConfig::default());

        let outcome = h
            .handler
            .handle(sync_trigger(RunAction::Delete), &CancellationToken::new())
            .await;

        assert!(matches!(outcome, ExecutionOutcome::Skipped));
        assert!(h.publisher.events().is_empty());
        assert_eq!(h.api.sync_calls(), 0);
    }

    #[tokio::test]
    async fn test_start_routes_to_sync() {
        let h = harness(FakeConfig::default());

        let outcome = h
            .handler
            .handle(sync_trigger(RunAction::Start), &CancellationToken::new())
            .await
            .finished()
            .await;

        assert!(outcome.is_success());
        assert_eq!(h.api.sync_calls(), 1);
        assert!(h.jobs.created().is_empty());
        let last = h.publisher.events().pop().unwrap().1;
        assert_eq!(last.job_id.as_deref(), Some("j1"));
    }

    #[tokio::test]
    async fn test_cluster_step_routes_to_preparation() {
        let mut tool = FakeConfig::tool_config("app1");
        tool.cluster_id = Some("cluster".to_string());
        let h = harness(FakeConfig::with_tool(tool));

        let outcome = h
            .handler
            .handle(sync_trigger(RunAction::Start), &CancellationToken::new())
            .await
            .finished()
            .await;

        assert!(outcome.is_success());
        assert_eq!(h.jobs.created().len(), 1);
        assert_eq!(h.jobs.deleted().len(), 1);
        assert_eq!(h.api.sync_calls(), 1);
    }

    #[tokio::test]
    async fn test_missing_step_configuration_fails() {
        let h = harness(FakeConfig::without_tool());

        let outcome = h
            .handler
            .handle(sync_trigger(RunAction::Start), &CancellationToken::new())
            .await;

        assert!(
            outcome
                .failure_reason()
                .unwrap()
                .starts_with("Failed to resolve step configuration")
        );
        let statuses: Vec<(Topic, Option<RunStatus>)> = h
            .publisher
            .events()
            .into_iter()
            .map(|(t, ctx)| (t, ctx.status))
            .collect();
        assert_eq!(
            statuses,
            vec![
                (Topic::PipelineResponse, Some(RunStatus::Failed)),
                (Topic::PipelineStatus, Some(RunStatus::Failed)),
                (Topic::PipelineConsoleLog, Some(RunStatus::Completed)),
            ]
        );
    }
}
