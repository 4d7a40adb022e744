//! Prepare-then-sync executor
//!
//! Runs an ephemeral job on the target cluster that checks out the manifests,
//! pins the image and pushes the result, then syncs the application. The job
//! is supervised under the same ceiling as the sync poller and is always
//! deleted, whatever the outcome.

use anyhow::{Context, Result};
use keel_core::domain::run::PipelineRunContext;
use keel_core::domain::tool::{ClusterTarget, ToolConfig};
use keel_core::dto::event::{ApplicationSnapshot, Topic};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::context::RunContext;
use crate::execution::ExecutionOutcome;
use crate::kubectl::{JobEvent, JobHandle, JobRunner, JobSpec};
use crate::repository::{ConfigResolver, EventPublisher, GitOpsApi};

use super::session::ToolSessions;
use super::sync::{SyncExecutor, resolve_run_count};

const PREPARING_MESSAGE: &str = "Preparing manifests";

/// Script run by the preparation job
///
/// Expects `GIT_URL`, `GIT_BRANCH`, `GIT_PATH`, `PIPELINE_ID` and `RUN_COUNT`;
/// `GIT_USERNAME`/`GIT_TOKEN` and `IMAGE_REFERENCE`/`IMAGE_URL` are optional.
const PREPARE_SCRIPT: &str = r##"set -eu
workdir="$(mktemp -d)"
if [ -n "${GIT_TOKEN:-}" ]; then
  repo_url="$(printf '%s' "$GIT_URL" | sed -e "s#://#://${GIT_USERNAME:-git}:${GIT_TOKEN}@#")"
else
  repo_url="$GIT_URL"
fi
git clone --quiet --depth 1 --branch "$GIT_BRANCH" "$repo_url" "$workdir"
cd "$workdir/${GIT_PATH:-.}"
if [ -n "${IMAGE_REFERENCE:-}" ] && [ -n "${IMAGE_URL:-}" ]; then
  echo "Setting image ${IMAGE_REFERENCE}=${IMAGE_URL}"
  kustomize edit set image "${IMAGE_REFERENCE}=${IMAGE_URL}"
fi
git -c user.name=keel -c user.email=keel@localhost commit --quiet -am "Pipeline ${PIPELINE_ID} run ${RUN_COUNT}" || echo "Manifests already up to date"
git push --quiet origin "HEAD:${GIT_BRANCH}"
echo "Manifests prepared"
"##;

/// Preparation job settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrepareSettings {
    pub control_image: String,
    pub namespace: String,
    /// Ceiling for the job, also set as its active deadline
    pub timeout: Duration,
}

impl From<&Config> for PrepareSettings {
    fn from(config: &Config) -> Self {
        Self {
            control_image: config.control_image.clone(),
            namespace: config.job_namespace.clone(),
            timeout: config.sync_timeout,
        }
    }
}

/// Executes sync steps that need their manifests prepared first
pub struct PreparationJobExecutor {
    settings: Arc<dyn ConfigResolver>,
    sessions: Arc<ToolSessions>,
    jobs: Arc<dyn JobRunner>,
    sync: Arc<SyncExecutor>,
    publisher: Arc<dyn EventPublisher>,
    prepare: PrepareSettings,
}

impl PreparationJobExecutor {
    pub fn new(
        settings: Arc<dyn ConfigResolver>,
        sessions: Arc<ToolSessions>,
        jobs: Arc<dyn JobRunner>,
        sync: Arc<SyncExecutor>,
        publisher: Arc<dyn EventPublisher>,
        prepare: PrepareSettings,
    ) -> Self {
        Self {
            settings,
            sessions,
            jobs,
            sync,
            publisher,
            prepare,
        }
    }

    /// Prepares the manifests, then syncs the application
    pub async fn run(
        &self,
        mut run: RunContext,
        tool: &ToolConfig,
        cancel: &CancellationToken,
    ) -> ExecutionOutcome {
        if let Err(e) = resolve_run_count(self.settings.as_ref(), &mut run).await {
            return run.report_failure(format!("{:#}", e)).await;
        }

        let customer_id = run.ctx().customer_id.clone();
        let Some(cluster_id) = tool.cluster_id.as_deref() else {
            return run
                .report_failure("Tool configuration has no target cluster")
                .await;
        };

        let cluster = match self.cluster_target(&customer_id, cluster_id).await {
            Ok(cluster) => cluster,
            Err(e) => return run.report_failure(format!("{:#}", e)).await,
        };
        let git_secrets = match self.git_credentials(&customer_id, tool).await {
            Ok(secrets) => secrets,
            Err(e) => return run.report_failure(format!("{:#}", e)).await,
        };

        let spec = self.job_spec(run.ctx(), tool, git_secrets);
        let handle = match self.jobs.create_job(&cluster, &spec).await {
            Ok(handle) => handle,
            Err(e) => {
                let handle = JobHandle {
                    name: spec.name.clone(),
                    namespace: spec.namespace.clone(),
                };
                self.reclaim(&cluster, &handle).await;
                return run
                    .report_failure(format!("Failed to create preparation job: {:#}", e))
                    .await;
            }
        };

        run.ctx_mut().pod_name = Some(handle.name.clone());
        run.ctx_mut().namespace = Some(handle.namespace.clone());
        run.report_running(PREPARING_MESSAGE).await;

        let supervised = self.supervise(&cluster, &handle, &run, cancel).await;
        self.reclaim(&cluster, &handle).await;
        if let Err(reason) = supervised {
            return run.report_failure(reason).await;
        }

        run.ctx_mut().pod_name = None;
        run.ctx_mut().namespace = None;

        let api = match self.sessions.open(&customer_id, tool, None).await {
            Ok(api) => api,
            Err(e) => return run.report_failure(format!("{:#}", e)).await,
        };

        let ctx = run.ctx().clone();
        let outcome = self.sync.sync_with(api.clone(), run, tool, cancel).await;

        if let Err(e) = self
            .publish_snapshot(api.as_ref(), &ctx, &tool.application_name)
            .await
        {
            warn!(
                "Failed to publish application snapshot for run {}: {:#}",
                ctx.run_key(),
                e
            );
        }

        outcome
    }

    async fn cluster_target(&self, customer_id: &str, cluster_id: &str) -> Result<ClusterTarget> {
        let (details, token) = self
            .sessions
            .credentials(customer_id, cluster_id, None)
            .await
            .context("Failed to resolve target cluster")?;

        Ok(ClusterTarget {
            server_url: details.url,
            token,
        })
    }

    async fn git_credentials(
        &self,
        customer_id: &str,
        tool: &ToolConfig,
    ) -> Result<BTreeMap<String, String>> {
        let mut secrets = BTreeMap::new();
        let Some(git_tool_id) = tool.git_tool_id.as_deref() else {
            return Ok(secrets);
        };

        let (details, token) = self
            .sessions
            .credentials(customer_id, git_tool_id, None)
            .await
            .context("Failed to resolve git credentials")?;

        secrets.insert("GIT_USERNAME".to_string(), details.username);
        secrets.insert("GIT_TOKEN".to_string(), token);
        Ok(secrets)
    }

    fn job_spec(
        &self,
        ctx: &PipelineRunContext,
        tool: &ToolConfig,
        secrets: BTreeMap<String, String>,
    ) -> JobSpec {
        let mut env = BTreeMap::new();
        env.insert("GIT_URL".to_string(), tool.git.url.clone());
        env.insert("GIT_BRANCH".to_string(), tool.git.branch.clone());
        env.insert("GIT_PATH".to_string(), tool.git.path.clone());
        env.insert("PIPELINE_ID".to_string(), ctx.pipeline_id.clone());
        env.insert("RUN_COUNT".to_string(), ctx.run_count.to_string());
        if let Some(reference) = &tool.image_reference {
            env.insert("IMAGE_REFERENCE".to_string(), reference.clone());
        }
        if let Some(url) = &tool.image_url {
            env.insert("IMAGE_URL".to_string(), url.clone());
        }

        let id = Uuid::new_v4().simple().to_string();
        JobSpec {
            name: format!("keel-prepare-{}", &id[..8]),
            namespace: self.prepare.namespace.clone(),
            image: self.prepare.control_image.clone(),
            script: PREPARE_SCRIPT.to_string(),
            env,
            secrets,
            active_deadline: self.prepare.timeout,
        }
    }

    /// Forwards job output to the console until the job exits
    async fn supervise(
        &self,
        cluster: &ClusterTarget,
        handle: &JobHandle,
        run: &RunContext,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), String> {
        let mut events = self
            .jobs
            .stream_logs(cluster, handle)
            .await
            .map_err(|e| format!("Failed to follow preparation job: {:#}", e))?;

        let deadline = tokio::time::sleep(self.prepare.timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Err("Preparation cancelled".to_string()),
                _ = &mut deadline => {
                    return Err(format!(
                        "Preparation job did not finish within {}s",
                        self.prepare.timeout.as_secs()
                    ));
                }
                event = events.recv() => match event {
                    Some(JobEvent::Output(line)) => run.log_console(line).await,
                    Some(JobEvent::Exited(0)) => {
                        info!("Preparation job {} succeeded", handle.name);
                        return Ok(());
                    }
                    Some(JobEvent::Exited(code)) => {
                        return Err(format!("Preparation job exited with code {}", code));
                    }
                    None => {
                        return Err("Preparation job ended without an exit status".to_string());
                    }
                },
            }
        }
    }

    async fn reclaim(&self, cluster: &ClusterTarget, handle: &JobHandle) {
        match self.jobs.delete_job(cluster, handle).await {
            Ok(()) => debug!("Reclaimed preparation job {}", handle.name),
            Err(e) => warn!("Failed to delete preparation job {}: {:#}", handle.name, e),
        }
    }

    async fn publish_snapshot(
        &self,
        api: &dyn GitOpsApi,
        ctx: &PipelineRunContext,
        application: &str,
    ) -> Result<()> {
        let app = api.get_application(application).await?;
        let snapshot = ApplicationSnapshot::capture(ctx, &app);
        let payload = serde_json::to_value(&snapshot).context("Failed to serialize snapshot")?;
        self.publisher
            .publish(Topic::ApplicationSnapshot, payload)
            .await
    }
}
