//! In-memory fakes of the repository traits used by unit tests

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use keel_client::ResourceActionTarget;
use keel_core::domain::application::{
    Application, ApplicationDestination, ApplicationMetadata, ApplicationSpec,
    ApplicationStatus, InfoItem, OperationPhase, OperationState, ResourceNode, ResourceTree,
    SyncOperationResult, SyncStatus,
};
use keel_core::domain::run::PipelineRunContext;
use keel_core::domain::tool::{ClusterTarget, GitSource, ToolConfig, ToolDetails, VaultKeyRef};
use keel_core::dto::event::Topic;
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::kubectl::{JobEvent, JobHandle, JobRunner, JobSpec};
use crate::repository::{
    ConfigResolver, EventPublisher, GitOpsApi, GitOpsConnector, SecretResolver, Trigger,
    TriggerSource,
};
use crate::service::{
    OperationPoller, PrepareSettings, PreparationJobExecutor, PromoteExecutor, SyncExecutor,
    ToolSessions, TriggerHandler,
};

/// Application "app1", deployed into "apps", in the given operation phase and sync status
pub fn application(phase: Option<OperationPhase>, status: SyncStatus) -> Application {
    Application {
        metadata: ApplicationMetadata {
            name: "app1".to_string(),
            namespace: Some("argocd".to_string()),
        },
        spec: ApplicationSpec {
            destination: ApplicationDestination {
                server: Some("https://kubernetes.default.svc".to_string()),
                namespace: Some("apps".to_string()),
            },
        },
        status: ApplicationStatus {
            sync: SyncOperationResult {
                status,
                revision: Some("4f2a9c1".to_string()),
            },
            operation_state: phase.map(|phase| OperationState {
                phase,
                message: None,
                started_at: None,
                finished_at: None,
            }),
            ..Default::default()
        },
    }
}

/// Pod node carrying a status marker in its info entries
pub fn pod(name: &str, namespace: &str, status: &str) -> ResourceNode {
    ResourceNode {
        kind: "Pod".to_string(),
        name: name.to_string(),
        namespace: Some(namespace.to_string()),
        group: None,
        info: vec![InfoItem {
            name: "Status Reason".to_string(),
            value: status.to_string(),
        }],
    }
}

/// Trigger handler wired to fakes, with the default step configuration
pub fn trigger_handler(
    api: Arc<ScriptedGitOps>,
    publisher: Arc<RecordingPublisher>,
) -> Arc<TriggerHandler> {
    let config = Arc::new(FakeConfig::default());
    let sessions = Arc::new(ToolSessions::new(
        config.clone(),
        Arc::new(FakeSecrets::with("argo-password", "pw")),
        Arc::new(FakeConnector::new(api)),
    ));
    let sync = Arc::new(SyncExecutor::new(
        config.clone(),
        sessions.clone(),
        OperationPoller::new(Duration::from_secs(5), Duration::from_secs(60)),
    ));
    let prepare = Arc::new(PreparationJobExecutor::new(
        config.clone(),
        sessions.clone(),
        Arc::new(ScriptedJobRunner::exiting(&[], 0)),
        sync.clone(),
        publisher.clone(),
        PrepareSettings {
            control_image: "docker.io/alpine/k8s:1.30.0".to_string(),
            namespace: "default".to_string(),
            timeout: Duration::from_secs(60),
        },
    ));
    let promote = Arc::new(PromoteExecutor::new(config.clone(), sessions));

    Arc::new(TriggerHandler::new(config, publisher, sync, prepare, promote))
}

/// Publisher that records every payload
#[derive(Default)]
pub struct RecordingPublisher {
    records: Mutex<Vec<(Topic, JsonValue)>>,
    failing: Option<Topic>,
}

impl RecordingPublisher {
    /// Publisher whose publishes to `topic` fail
    pub fn failing_on(topic: Topic) -> Self {
        Self {
            failing: Some(topic),
            ..Default::default()
        }
    }

    /// Run-context events in publish order, analytics records excluded
    pub fn events(&self) -> Vec<(Topic, PipelineRunContext)> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|(topic, _)| *topic != Topic::ApplicationSnapshot)
            .map(|(topic, payload)| (*topic, serde_json::from_value(payload.clone()).unwrap()))
            .collect()
    }

    /// Raw payloads published to one topic
    pub fn raw(&self, topic: Topic) -> Vec<JsonValue> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| *t == topic)
            .map(|(_, payload)| payload.clone())
            .collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, topic: Topic, payload: JsonValue) -> Result<()> {
        if self.failing == Some(topic) {
            bail!("broker unavailable");
        }
        self.records.lock().unwrap().push((topic, payload));
        Ok(())
    }
}

/// Controller fake replaying a script of application states
///
/// The last scripted application repeats once the script is exhausted; an
/// empty script always answers `Succeeded`/`Synced`.
#[derive(Default)]
pub struct ScriptedGitOps {
    applications: Vec<Application>,
    tree: ResourceTree,
    pod_logs: Mutex<HashMap<String, String>>,
    failing_pods: Mutex<HashSet<String>>,
    get_calls: AtomicUsize,
    sync_calls: AtomicUsize,
    fail_get_from: AtomicUsize,
    fail_sync: AtomicBool,
    fail_tree: AtomicBool,
    panic_on_sync: AtomicBool,
    log_requests: Mutex<Vec<String>>,
    log_namespaces: Mutex<Vec<String>>,
    action_calls: Mutex<Vec<(String, ResourceActionTarget, String)>>,
}

impl ScriptedGitOps {
    pub fn with_applications(applications: Vec<Application>) -> Self {
        Self {
            applications,
            ..Default::default()
        }
    }

    pub fn with_tree(mut self, tree: ResourceTree) -> Self {
        self.tree = tree;
        self
    }

    pub fn set_pod_logs(&self, pod: &str, logs: &str) {
        self.pod_logs
            .lock()
            .unwrap()
            .insert(pod.to_string(), logs.to_string());
    }

    /// Fails every log request for `pod`
    pub fn fail_pod_logs(&self, pod: &str) {
        self.failing_pods.lock().unwrap().insert(pod.to_string());
    }

    /// Fails every `get_application` call from the `n`th on (1-based)
    pub fn fail_get_from(&self, n: usize) {
        self.fail_get_from.store(n, Ordering::SeqCst);
    }

    pub fn fail_sync(&self) {
        self.fail_sync.store(true, Ordering::SeqCst);
    }

    pub fn fail_tree(&self) {
        self.fail_tree.store(true, Ordering::SeqCst);
    }

    pub fn panic_on_sync(&self) {
        self.panic_on_sync.store(true, Ordering::SeqCst);
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn sync_calls(&self) -> usize {
        self.sync_calls.load(Ordering::SeqCst)
    }

    pub fn log_requests(&self) -> Vec<String> {
        self.log_requests.lock().unwrap().clone()
    }

    pub fn log_namespaces(&self) -> Vec<String> {
        self.log_namespaces.lock().unwrap().clone()
    }

    pub fn action_calls(&self) -> Vec<(String, ResourceActionTarget, String)> {
        self.action_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl GitOpsApi for ScriptedGitOps {
    async fn get_application(&self, _name: &str) -> Result<Application> {
        let call = self.get_calls.fetch_add(1, Ordering::SeqCst) + 1;

        let fail_from = self.fail_get_from.load(Ordering::SeqCst);
        if fail_from > 0 && call >= fail_from {
            bail!("502 Bad Gateway");
        }

        Ok(match self.applications.len() {
            0 => application(Some(OperationPhase::Succeeded), SyncStatus::Synced),
            len => self.applications[(call - 1).min(len - 1)].clone(),
        })
    }

    async fn sync_application(&self, _name: &str) -> Result<Application> {
        if self.panic_on_sync.load(Ordering::SeqCst) {
            panic!("scripted panic during sync");
        }

        self.sync_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_sync.load(Ordering::SeqCst) {
            bail!("500 Internal Server Error: application spec is invalid");
        }

        Ok(application(Some(OperationPhase::Running), SyncStatus::OutOfSync))
    }

    async fn get_resource_tree(&self, _name: &str) -> Result<ResourceTree> {
        if self.fail_tree.load(Ordering::SeqCst) {
            bail!("503 Service Unavailable");
        }
        Ok(self.tree.clone())
    }

    async fn get_pod_logs(&self, _application: &str, namespace: &str, pod: &str) -> Result<String> {
        self.log_requests.lock().unwrap().push(pod.to_string());
        self.log_namespaces.lock().unwrap().push(namespace.to_string());
        if self.failing_pods.lock().unwrap().contains(pod) {
            bail!("404 Not Found: pods \"{}\" not found", pod);
        }
        Ok(self
            .pod_logs
            .lock()
            .unwrap()
            .get(pod)
            .cloned()
            .unwrap_or_default())
    }

    async fn run_resource_action(
        &self,
        application: &str,
        target: &ResourceActionTarget,
        action: &str,
    ) -> Result<()> {
        self.action_calls.lock().unwrap().push((
            application.to_string(),
            target.clone(),
            action.to_string(),
        ));
        Ok(())
    }
}

/// Configuration service fake
///
/// Tool registrations are synthesized from the tool id: tool `argo` is stored
/// under vault key `argo-password`.
pub struct FakeConfig {
    run_count: Option<u64>,
    tool: Option<ToolConfig>,
}

impl Default for FakeConfig {
    fn default() -> Self {
        Self {
            run_count: Some(7),
            tool: Some(Self::tool_config("app1")),
        }
    }
}

impl FakeConfig {
    pub fn tool_config(application: &str) -> ToolConfig {
        ToolConfig {
            application_name: application.to_string(),
            tool_id: "argo".to_string(),
            git: GitSource {
                url: "https://git.example.com/org/deploy.git".to_string(),
                branch: "main".to_string(),
                path: format!("apps/{}", application),
            },
            image_reference: None,
            image_url: None,
            cluster_id: None,
            git_tool_id: None,
            two_factor: false,
            secret_token: false,
            rollout_name: None,
            rollout_namespace: None,
        }
    }

    pub fn with_tool(tool: ToolConfig) -> Self {
        Self {
            tool: Some(tool),
            ..Default::default()
        }
    }

    pub fn without_tool() -> Self {
        Self {
            tool: None,
            ..Default::default()
        }
    }

    pub fn without_run_count() -> Self {
        Self {
            run_count: None,
            ..Default::default()
        }
    }
}

#[async_trait]
impl ConfigResolver for FakeConfig {
    async fn run_count(&self, _pipeline_id: &str, _step_id: &str) -> Result<u64> {
        self.run_count
            .ok_or_else(|| anyhow!("run counter unavailable"))
    }

    async fn tool_config(&self, _pipeline_id: &str, step_id: &str) -> Result<ToolConfig> {
        self.tool
            .clone()
            .ok_or_else(|| anyhow!("step {} has no tool configuration", step_id))
    }

    async fn tool_details(&self, customer_id: &str, tool_id: &str) -> Result<ToolDetails> {
        Ok(ToolDetails {
            url: format!("https://{}.example.com", tool_id),
            username: "admin".to_string(),
            owner: customer_id.to_string(),
            vault_key: VaultKeyRef {
                owner_id: "owner-1".to_string(),
                key: format!("{}-password", tool_id),
            },
        })
    }
}

/// Secret store fake
#[derive(Default)]
pub struct FakeSecrets {
    values: HashMap<String, String>,
    owners: Mutex<Vec<String>>,
}

impl FakeSecrets {
    pub fn with(key: &str, value: &str) -> Self {
        Self::default().and(key, value)
    }

    pub fn and(mut self, key: &str, value: &str) -> Self {
        self.values.insert(key.to_string(), value.to_string());
        self
    }

    /// Owners of every secret requested so far
    pub fn owners(&self) -> Vec<String> {
        self.owners.lock().unwrap().clone()
    }
}

#[async_trait]
impl SecretResolver for FakeSecrets {
    async fn get_secret(&self, owner_id: &str, key: &str) -> Result<String> {
        self.owners.lock().unwrap().push(owner_id.to_string());
        self.values
            .get(key)
            .cloned()
            .ok_or_else(|| anyhow!("secret {} not found", key))
    }
}

/// Connector handing out one shared controller fake
pub struct FakeConnector {
    api: Arc<ScriptedGitOps>,
    passwords: Mutex<Vec<String>>,
}

impl FakeConnector {
    pub fn new(api: Arc<ScriptedGitOps>) -> Self {
        Self {
            api,
            passwords: Mutex::new(Vec::new()),
        }
    }

    pub fn passwords(&self) -> Vec<String> {
        self.passwords.lock().unwrap().clone()
    }
}

#[async_trait]
impl GitOpsConnector for FakeConnector {
    async fn connect(&self, _details: &ToolDetails, password: &str) -> Result<Arc<dyn GitOpsApi>> {
        self.passwords.lock().unwrap().push(password.to_string());
        Ok(self.api.clone())
    }
}

/// Job runner fake replaying a script of job events
#[derive(Default)]
pub struct ScriptedJobRunner {
    script: Vec<JobEvent>,
    hang: bool,
    fail_create: bool,
    created: Mutex<Vec<JobSpec>>,
    clusters: Mutex<Vec<ClusterTarget>>,
    deleted: Mutex<Vec<JobHandle>>,
    open_streams: Mutex<Vec<mpsc::Sender<JobEvent>>>,
}

impl ScriptedJobRunner {
    /// Job printing `lines`, then exiting with `code`
    pub fn exiting(lines: &[&str], code: i32) -> Self {
        let mut script: Vec<JobEvent> = lines
            .iter()
            .map(|line| JobEvent::Output(line.to_string()))
            .collect();
        script.push(JobEvent::Exited(code));
        Self {
            script,
            ..Default::default()
        }
    }

    /// Job that never exits
    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Default::default()
        }
    }

    pub fn failing_create() -> Self {
        Self {
            fail_create: true,
            ..Default::default()
        }
    }

    pub fn created(&self) -> Vec<JobSpec> {
        self.created.lock().unwrap().clone()
    }

    pub fn clusters(&self) -> Vec<ClusterTarget> {
        self.clusters.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<JobHandle> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobRunner for ScriptedJobRunner {
    async fn create_job(&self, cluster: &ClusterTarget, spec: &JobSpec) -> Result<JobHandle> {
        if self.fail_create {
            bail!("admission webhook denied the request");
        }
        self.created.lock().unwrap().push(spec.clone());
        self.clusters.lock().unwrap().push(cluster.clone());
        Ok(JobHandle {
            name: spec.name.clone(),
            namespace: spec.namespace.clone(),
        })
    }

    async fn stream_logs(
        &self,
        _cluster: &ClusterTarget,
        _handle: &JobHandle,
    ) -> Result<mpsc::Receiver<JobEvent>> {
        let (tx, rx) = mpsc::channel(self.script.len().max(1));
        for event in &self.script {
            tx.try_send(event.clone())?;
        }
        if self.hang {
            self.open_streams.lock().unwrap().push(tx);
        }
        Ok(rx)
    }

    async fn delete_job(&self, _cluster: &ClusterTarget, handle: &JobHandle) -> Result<()> {
        self.deleted.lock().unwrap().push(handle.clone());
        Ok(())
    }
}

/// Trigger source replaying fixed batches
pub struct QueuedTriggers {
    batches: Mutex<VecDeque<Vec<Trigger>>>,
}

impl QueuedTriggers {
    pub fn new(batches: Vec<Vec<Trigger>>) -> Self {
        Self {
            batches: Mutex::new(batches.into()),
        }
    }
}

#[async_trait]
impl TriggerSource for QueuedTriggers {
    async fn fetch(&self) -> Result<Vec<Trigger>> {
        Ok(self.batches.lock().unwrap().pop_front().unwrap_or_default())
    }
}
