//! Pod log streaming
//!
//! Publishes the logs of the application's running pods once a sync succeeded.
//! Streaming is best-effort: a pod whose logs cannot be read is skipped, and a
//! failed tree lookup (or every pod failing) degrades to a single warning line
//! on the console topic. The stream is always closed with the empty
//! `COMPLETED` marker.

use anyhow::{Result, bail};
use tracing::{debug, info, warn};

use crate::context::RunContext;
use crate::repository::GitOpsApi;

/// Console line published when pod logs cannot be retrieved
pub const LOG_RETRIEVAL_WARNING: &str = "Unable to Retrieve pod logs for the sync";

#[derive(Debug, Clone, Default)]
pub struct LogStreamer;

impl LogStreamer {
    pub fn new() -> Self {
        Self
    }

    /// Streams pod logs of `application` and closes the run's console stream
    pub async fn stream(&self, api: &dyn GitOpsApi, application: &str, mut run: RunContext) {
        if let Err(e) = self.publish_pod_logs(api, application, &mut run).await {
            warn!(
                "Failed to stream pod logs of {} for run {}: {:#}",
                application,
                run.ctx().run_key(),
                e
            );
            run.log_console(LOG_RETRIEVAL_WARNING).await;
        }

        run.complete_stream().await;
    }

    async fn publish_pod_logs(
        &self,
        api: &dyn GitOpsApi,
        application: &str,
        run: &mut RunContext,
    ) -> Result<()> {
        let tree = api.get_resource_tree(application).await?;

        let running = tree.running_pods();
        if running.is_empty() {
            info!("Application {} has no running pods, nothing to stream", application);
            return Ok(());
        }

        let fallback = match tree.first_pod_namespace() {
            Some(namespace) => Some(namespace.to_string()),
            None => destination_namespace(api, application).await,
        };
        if let Some(namespace) = &fallback {
            run.ctx_mut().namespace = Some(namespace.clone());
        }

        let mut failures = 0;
        for pod in &running {
            let namespace = pod
                .namespace
                .as_deref()
                .or(fallback.as_deref())
                .unwrap_or_default();

            let logs = match api.get_pod_logs(application, namespace, &pod.name).await {
                Ok(logs) => logs,
                Err(e) => {
                    warn!("Failed to retrieve logs of pod {}: {:#}", pod.name, e);
                    failures += 1;
                    continue;
                }
            };

            if logs.trim().is_empty() {
                debug!("Pod {} has no logs yet", pod.name);
                continue;
            }

            run.ctx_mut().pod_name = Some(pod.name.clone());
            run.log_console(logs).await;
        }

        if failures == running.len() {
            bail!("Logs of all {} running pod(s) were unavailable", failures);
        }

        Ok(())
    }
}

/// Namespace the application deploys into, for pods reported without one
async fn destination_namespace(api: &dyn GitOpsApi, application: &str) -> Option<String> {
    match api.get_application(application).await {
        Ok(app) => app.destination_namespace().map(str::to_string),
        Err(e) => {
            debug!("No destination namespace for {}: {:#}", application, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingPublisher, ScriptedGitOps, pod};
    use keel_core::domain::application::ResourceTree;
    use keel_core::domain::run::{PipelineRunContext, RunAction, RunState, RunStatus};
    use keel_core::dto::event::Topic;
    use std::sync::Arc;

    fn streaming_run(publisher: &Arc<RecordingPublisher>) -> RunContext {
        let mut run = RunContext::new(
            PipelineRunContext::new("p1", "s1", "c1", RunAction::Start),
            publisher.clone(),
        );
        run.advance(RunState::Streaming);
        run
    }

    #[tokio::test]
    async fn test_streams_only_running_pods() {
        let api = ScriptedGitOps::default().with_tree(ResourceTree {
            nodes: vec![pod("a", "apps", "Running"), pod("b", "apps", "Pending")],
        });
        api.set_pod_logs("a", "started\n");
        api.set_pod_logs("b", "should not be read\n");

        let publisher = Arc::new(RecordingPublisher::default());
        LogStreamer::new()
            .stream(&api, "app1", streaming_run(&publisher))
            .await;

        assert_eq!(api.log_requests(), vec!["a".to_string()]);

        let console: Vec<_> = publisher
            .events()
            .into_iter()
            .filter(|(topic, _)| *topic == Topic::PipelineConsoleLog)
            .map(|(_, ctx)| ctx)
            .collect();
        assert_eq!(console.len(), 2);
        assert_eq!(console[0].pod_name.as_deref(), Some("a"));
        assert_eq!(console[0].namespace.as_deref(), Some("apps"));
        assert_eq!(console[0].console_log.as_deref(), Some("started\n"));
        assert_eq!(console[1].status, Some(RunStatus::Completed));
        assert_eq!(console[1].console_log.as_deref(), Some(""));
    }

    #[tokio::test]
    async fn test_pods_without_namespace_are_streamed() {
        let tree: ResourceTree = serde_json::from_value(serde_json::json!({
            "nodes": [
                { "kind": "Pod", "name": "a", "info": [{ "value": "Running" }] },
                { "kind": "Pod", "name": "b", "info": [{ "value": "Pending" }] }
            ]
        }))
        .unwrap();
        let api = ScriptedGitOps::default().with_tree(tree);
        api.set_pod_logs("a", "listening on :8080\n");

        let publisher = Arc::new(RecordingPublisher::default());
        LogStreamer::new()
            .stream(&api, "app1", streaming_run(&publisher))
            .await;

        assert_eq!(api.log_requests(), vec!["a".to_string()]);
        assert_eq!(api.log_namespaces(), vec!["apps".to_string()]);

        let events = publisher.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].1.pod_name.as_deref(), Some("a"));
        assert_eq!(events[0].1.namespace.as_deref(), Some("apps"));
        assert_eq!(events[0].1.console_log.as_deref(), Some("listening on :8080\n"));
        assert_eq!(events[1].1.status, Some(RunStatus::Completed));
    }

    #[tokio::test]
    async fn test_failing_pod_does_not_stop_the_others() {
        let api = ScriptedGitOps::default().with_tree(ResourceTree {
            nodes: vec![pod("a", "apps", "Running"), pod("c", "apps", "Running")],
        });
        api.fail_pod_logs("a");
        api.set_pod_logs("c", "ready\n");

        let publisher = Arc::new(RecordingPublisher::default());
        LogStreamer::new()
            .stream(&api, "app1", streaming_run(&publisher))
            .await;

        assert_eq!(api.log_requests(), vec!["a".to_string(), "c".to_string()]);
        let logs: Vec<Option<String>> = publisher
            .events()
            .into_iter()
            .map(|(_, ctx)| ctx.console_log)
            .collect();
        assert_eq!(logs, vec![Some("ready\n".to_string()), Some(String::new())]);
    }

    #[tokio::test]
    async fn test_every_pod_failing_degrades_to_warning() {
        let api = ScriptedGitOps::default().with_tree(ResourceTree {
            nodes: vec![pod("a", "apps", "Running"), pod("c", "apps", "Running")],
        });
        api.fail_pod_logs("a");
        api.fail_pod_logs("c");

        let publisher = Arc::new(RecordingPublisher::default());
        LogStreamer::new()
            .stream(&api, "app1", streaming_run(&publisher))
            .await;

        let logs: Vec<Option<String>> = publisher
            .events()
            .into_iter()
            .map(|(_, ctx)| ctx.console_log)
            .collect();
        assert_eq!(
            logs,
            vec![Some(LOG_RETRIEVAL_WARNING.to_string()), Some(String::new())]
        );
    }

    #[tokio::test]
    async fn test_tree_failure_degrades_to_warning() {
        let api = ScriptedGitOps::default();
        api.fail_tree();

        let publisher = Arc::new(RecordingPublisher::default());
        LogStreamer::new()
            .stream(&api, "app1", streaming_run(&publisher))
            .await;

        let logs: Vec<Option<String>> = publisher
            .events()
            .into_iter()
            .map(|(_, ctx)| ctx.console_log)
            .collect();
        assert_eq!(
            logs,
            vec![Some(LOG_RETRIEVAL_WARNING.to_string()), Some(String::new())]
        );
    }

    #[tokio::test]
    async fn test_no_pods_still_completes() {
        let api = ScriptedGitOps::default();
        let publisher = Arc::new(RecordingPublisher::default());

        LogStreamer::new()
            .stream(&api, "app1", streaming_run(&publisher))
            .await;

        let events = publisher.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].1.status, Some(RunStatus::Completed));
    }
}
