//! Ephemeral Kubernetes jobs
//!
//! Handles the lifecycle of preparation jobs on a target cluster:
//! - Creating a Job (plus a Secret for its credentials) from a shell script
//! - Tailing the job's logs and reporting its exit status
//! - Deleting the Job and Secret once supervision ends
//!
//! The cluster is addressed per call through a `ClusterTarget`, so one runner
//! can drive jobs on any number of clusters. Each kubectl invocation reads the
//! target from its own private kubeconfig file; the token never appears on a
//! command line.

use anyhow::{Context, Result};
use async_trait::async_trait;
use keel_core::domain::tool::ClusterTarget;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::io::Write;
use std::process::Stdio;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Buffered log lines per job before the tailer waits for the consumer
const LOG_CHANNEL_CAPACITY: usize = 256;

/// Attempts made to read the final job status after the log stream ends
const STATUS_ATTEMPTS: u32 = 30;

/// Delay between final status reads
const STATUS_RETRY_DELAY: Duration = Duration::from_secs(2);

/// What to run in a preparation job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub name: String,
    pub namespace: String,
    pub image: String,
    /// Shell script executed with `/bin/sh -c`
    pub script: String,
    pub env: BTreeMap<String, String>,
    /// Exposed to the container as environment variables through a Secret
    pub secrets: BTreeMap<String, String>,
    /// Kubernetes-side deadline, matching the runner's own ceiling
    pub active_deadline: Duration,
}

/// Reference to a created job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub name: String,
    pub namespace: String,
}

/// Events observed while tailing a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    /// One chunk of container output
    Output(String),
    /// The job finished with this exit code; always the last event
    Exited(i32),
}

/// Runner of ephemeral command-execution workloads
#[async_trait]
pub trait JobRunner: Send + Sync {
    /// Creates the job and returns once the cluster accepted it
    async fn create_job(&self, cluster: &ClusterTarget, spec: &JobSpec) -> Result<JobHandle>;

    /// Subscribes to the job's output
    ///
    /// The receiver yields `Output` events followed by a single `Exited`.
    /// Dropping the receiver stops the tail.
    async fn stream_logs(
        &self,
        cluster: &ClusterTarget,
        handle: &JobHandle,
    ) -> Result<mpsc::Receiver<JobEvent>>;

    /// Deletes the job and everything created with it
    async fn delete_job(&self, cluster: &ClusterTarget, handle: &JobHandle) -> Result<()>;
}

/// JobRunner driving `kubectl`
pub struct KubectlJobRunner {
    kubectl: String,
}

impl KubectlJobRunner {
    /// Creates a runner using the given kubectl binary
    pub fn new(kubectl: impl Into<String>) -> Self {
        Self {
            kubectl: kubectl.into(),
        }
    }

    /// Base command addressing the target cluster and namespace
    ///
    /// The returned kubeconfig must outlive the command; it is removed from
    /// disk when dropped.
    fn command(&self, cluster: &ClusterTarget, namespace: &str) -> Result<(Command, NamedTempFile)> {
        let kubeconfig = write_kubeconfig(cluster, namespace)?;

        let mut command = Command::new(&self.kubectl);
        command
            .arg(format!("--kubeconfig={}", kubeconfig.path().display()))
            .arg(format!("--namespace={}", namespace))
            .kill_on_drop(true);
        Ok((command, kubeconfig))
    }

    async fn job_exit_code(&self, cluster: &ClusterTarget, handle: &JobHandle) -> Result<Option<i32>> {
        let (mut command, _kubeconfig) = self.command(cluster, &handle.namespace)?;
        let output = command
            .arg("get")
            .arg("job")
            .arg(&handle.name)
            .arg("--output=json")
            .output()
            .await
            .context("Failed to execute kubectl get job")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("kubectl get job failed: {}", stderr.trim());
        }

        let job: JobObject =
            serde_json::from_slice(&output.stdout).context("Failed to parse job status")?;
        Ok(job.status.exit_code())
    }
}

#[derive(Deserialize, Default)]
struct JobObject {
    #[serde(default)]
    status: JobStatusView,
}

#[derive(Deserialize, Default)]
struct JobStatusView {
    #[serde(default)]
    succeeded: u32,
    #[serde(default)]
    failed: u32,
}

impl JobStatusView {
    fn exit_code(&self) -> Option<i32> {
        if self.succeeded > 0 {
            Some(0)
        } else if self.failed > 0 {
            Some(1)
        } else {
            None
        }
    }
}

/// Kubeconfig document selecting `cluster` as the current context
fn kubeconfig_document(cluster: &ClusterTarget, namespace: &str) -> serde_json::Value {
    json!({
        "apiVersion": "v1",
        "kind": "Config",
        "clusters": [{ "name": "target", "cluster": { "server": cluster.server_url } }],
        "users": [{ "name": "keel", "user": { "token": cluster.token } }],
        "contexts": [{
            "name": "target",
            "context": { "cluster": "target", "user": "keel", "namespace": namespace }
        }],
        "current-context": "target"
    })
}

/// Writes the kubeconfig to a file only the runner's user can read
fn write_kubeconfig(cluster: &ClusterTarget, namespace: &str) -> Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("keel-kubeconfig-")
        .tempfile()
        .context("Failed to create kubeconfig")?;
    serde_json::to_writer(&mut file, &kubeconfig_document(cluster, namespace))
        .context("Failed to write kubeconfig")?;
    file.flush().context("Failed to write kubeconfig")?;
    Ok(file)
}

/// Name of the Secret created alongside a job
fn secret_name(job_name: &str) -> String {
    format!("{}-env", job_name)
}

/// Builds the manifest list (Secret + Job) applied for a spec
fn job_manifest(spec: &JobSpec) -> serde_json::Value {
    let env: Vec<_> = spec
        .env
        .iter()
        .map(|(name, value)| json!({ "name": name, "value": value }))
        .collect();

    json!({
        "apiVersion": "v1",
        "kind": "List",
        "items": [
            {
                "apiVersion": "v1",
                "kind": "Secret",
                "metadata": {
                    "name": secret_name(&spec.name),
                    "namespace": spec.namespace,
                    "labels": { "app.kubernetes.io/managed-by": "keel" }
                },
                "type": "Opaque",
                "stringData": spec.secrets
            },
            {
                "apiVersion": "batch/v1",
                "kind": "Job",
                "metadata": {
                    "name": spec.name,
                    "namespace": spec.namespace,
                    "labels": { "app.kubernetes.io/managed-by": "keel" }
                },
                "spec": {
                    "backoffLimit": 0,
                    "activeDeadlineSeconds": spec.active_deadline.as_secs(),
                    "template": {
                        "spec": {
                            "restartPolicy": "Never",
                            "containers": [{
                                "name": "prepare",
                                "image": spec.image,
                                "command": ["/bin/sh", "-c", spec.script],
                                "env": env,
                                "envFrom": [{ "secretRef": { "name": secret_name(&spec.name) } }]
                            }]
                        }
                    }
                }
            }
        ]
    })
}

#[async_trait]
impl JobRunner for KubectlJobRunner {
    async fn create_job(&self, cluster: &ClusterTarget, spec: &JobSpec) -> Result<JobHandle> {
        info!(
            "Creating job {} in namespace {} with image {}",
            spec.name, spec.namespace, spec.image
        );

        let manifest = serde_json::to_vec(&job_manifest(spec))?;

        let (mut command, _kubeconfig) = self.command(cluster, &spec.namespace)?;
        let mut child = command
            .arg("apply")
            .arg("--filename=-")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context("Failed to execute kubectl apply")?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&manifest)
                .await
                .context("Failed to write job manifest")?;
        }

        let output = child
            .wait_with_output()
            .await
            .context("Failed to wait for kubectl apply")?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !stdout.trim().is_empty() {
            debug!("kubectl apply stdout: {}", stdout.trim());
        }

        if !output.status.success() {
            let exit_code = output.status.code().unwrap_or(-1);
            anyhow::bail!(
                "Failed to create job {}: exit_code={}, stderr='{}'",
                spec.name,
                exit_code,
                stderr.trim()
            );
        }

        info!("Job {} created", spec.name);
        Ok(JobHandle {
            name: spec.name.clone(),
            namespace: spec.namespace.clone(),
        })
    }

    async fn stream_logs(
        &self,
        cluster: &ClusterTarget,
        handle: &JobHandle,
    ) -> Result<mpsc::Receiver<JobEvent>> {
        let (mut command, kubeconfig) = self.command(cluster, &handle.namespace)?;
        let mut child = command
            .arg("logs")
            .arg("--follow")
            .arg("--pod-running-timeout=2m")
            .arg(format!("job/{}", handle.name))
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .context("Failed to execute kubectl logs")?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow::anyhow!("kubectl logs has no stdout"))?;

        let (tx, rx) = mpsc::channel(LOG_CHANNEL_CAPACITY);
        let runner = KubectlJobRunner::new(self.kubectl.clone());
        let cluster = cluster.clone();
        let handle = handle.clone();

        tokio::spawn(async move {
            let _kubeconfig = kubeconfig;
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if tx.send(JobEvent::Output(line)).await.is_err() {
                            debug!("Log consumer for job {} went away", handle.name);
                            return;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Failed to read logs of job {}: {}", handle.name, e);
                        break;
                    }
                }
            }

            if let Err(e) = child.wait().await {
                warn!("kubectl logs for job {} did not exit cleanly: {}", handle.name, e);
            }

            for _ in 0..STATUS_ATTEMPTS {
                match runner.job_exit_code(&cluster, &handle).await {
                    Ok(Some(code)) => {
                        let _ = tx.send(JobEvent::Exited(code)).await;
                        return;
                    }
                    Ok(None) => debug!("Job {} has no final status yet", handle.name),
                    Err(e) => warn!("Failed to read status of job {}: {:#}", handle.name, e),
                }
                tokio::time::sleep(STATUS_RETRY_DELAY).await;
            }

            warn!("Job {} never reported a final status", handle.name);
            let _ = tx.send(JobEvent::Exited(-1)).await;
        });

        Ok(rx)
    }

    async fn delete_job(&self, cluster: &ClusterTarget, handle: &JobHandle) -> Result<()> {
        info!("Deleting job {} in namespace {}", handle.name, handle.namespace);

        let (mut command, _kubeconfig) = self.command(cluster, &handle.namespace)?;
        let output = command
            .arg("delete")
            .arg(format!("job/{}", handle.name))
            .arg(format!("secret/{}", secret_name(&handle.name)))
            .arg("--ignore-not-found")
            .arg("--cascade=foreground")
            .arg("--wait=false")
            .output()
            .await
            .context("Failed to execute kubectl delete")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("Failed to delete job {}: {}", handle.name, stderr.trim());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> JobSpec {
        JobSpec {
            name: "keel-prepare-abc".to_string(),
            namespace: "ci".to_string(),
            image: "alpine/k8s:1.30.0".to_string(),
            script: "echo hi".to_string(),
            env: BTreeMap::from([("GIT_PATH".to_string(), "overlays/prod".to_string())]),
            secrets: BTreeMap::from([("GIT_TOKEN".to_string(), "t0k3n".to_string())]),
            active_deadline: Duration::from_secs(600),
        }
    }

    #[test]
    fn test_manifest_shape() {
        let manifest = job_manifest(&spec());
        let items = manifest["items"].as_array().unwrap();
        assert_eq!(items.len(), 2);

        let secret = &items[0];
        assert_eq!(secret["kind"], "Secret");
        assert_eq!(secret["metadata"]["name"], "keel-prepare-abc-env");
        assert_eq!(secret["stringData"]["GIT_TOKEN"], "t0k3n");

        let job = &items[1];
        assert_eq!(job["kind"], "Job");
        assert_eq!(job["spec"]["backoffLimit"], 0);
        assert_eq!(job["spec"]["activeDeadlineSeconds"], 600);
        let container = &job["spec"]["template"]["spec"]["containers"][0];
        assert_eq!(container["command"][2], "echo hi");
        assert_eq!(container["env"][0]["name"], "GIT_PATH");
        assert_eq!(container["envFrom"][0]["secretRef"]["name"], "keel-prepare-abc-env");
    }

    #[test]
    fn test_secret_values_stay_out_of_container_env() {
        let manifest = job_manifest(&spec());
        let env = manifest["items"][1]["spec"]["template"]["spec"]["containers"][0]["env"].to_string();
        assert!(!env.contains("t0k3n"));
    }

    fn cluster() -> ClusterTarget {
        ClusterTarget {
            server_url: "https://k8s.example.com".to_string(),
            token: "cluster-t0k3n".to_string(),
        }
    }

    #[test]
    fn test_token_stays_off_command_line() {
        let runner = KubectlJobRunner::new("kubectl");
        let (command, kubeconfig) = runner.command(&cluster(), "ci").unwrap();

        let args: Vec<String> = command
            .as_std()
            .get_args()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();
        assert!(args.iter().all(|arg| !arg.contains("cluster-t0k3n")));
        assert!(args.contains(&format!("--kubeconfig={}", kubeconfig.path().display())));
        assert!(args.contains(&"--namespace=ci".to_string()));

        let written: serde_json::Value =
            serde_json::from_slice(&std::fs::read(kubeconfig.path()).unwrap()).unwrap();
        assert_eq!(written["users"][0]["user"]["token"], "cluster-t0k3n");
        assert_eq!(written["clusters"][0]["cluster"]["server"], "https://k8s.example.com");
        assert_eq!(written["current-context"], "target");
    }

    #[test]
    fn test_kubeconfig_removed_on_drop() {
        let runner = KubectlJobRunner::new("kubectl");
        let (_command, kubeconfig) = runner.command(&cluster(), "ci").unwrap();
        let path = kubeconfig.path().to_path_buf();
        assert!(path.exists());

        drop(kubeconfig);
        assert!(!path.exists());
    }

    #[test]
    fn test_job_status_exit_code() {
        let running = JobStatusView::default();
        assert_eq!(running.exit_code(), None);

        let succeeded = JobStatusView { succeeded: 1, failed: 0 };
        assert_eq!(succeeded.exit_code(), Some(0));

        let failed = JobStatusView { succeeded: 0, failed: 1 };
        assert_eq!(failed.exit_code(), Some(1));
    }
}
