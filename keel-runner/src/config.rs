//! Runner configuration
//!
//! Defines all configurable parameters for the runner including
//! collaborator endpoints, polling cadence and the sync ceiling.

use std::time::Duration;

/// Runner configuration
///
/// All timeouts and intervals are configurable to allow tuning
/// for different deployment scenarios (dev vs prod, fast vs slow controllers).
#[derive(Debug, Clone)]
pub struct Config {
    /// Unique identifier for this runner instance
    pub runner_id: String,

    /// Pipeline/tool configuration service base URL
    pub config_service_url: String,

    /// Secret store base URL
    pub vault_url: String,

    /// Event bus REST proxy base URL
    pub broker_url: String,

    /// Consumer group used when reading trigger topics
    pub consumer_group: String,

    /// How often to poll a sync operation for a terminal phase
    pub poll_interval: Duration,

    /// Wall-clock ceiling for operation polling and preparation jobs
    pub sync_timeout: Duration,

    /// Per-request timeout for every HTTP collaborator
    pub http_timeout: Duration,

    /// Max concurrent pipeline runs
    pub max_parallel_runs: usize,

    /// How often to poll the trigger topics
    pub trigger_poll_interval: Duration,

    /// Image used by preparation jobs
    pub control_image: String,

    /// Namespace preparation jobs are created in
    pub job_namespace: String,

    /// kubectl binary used to drive preparation jobs
    pub kubectl_path: String,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(runner_id: String) -> Self {
        Self {
            runner_id,
            config_service_url: "http://localhost:8081".to_string(),
            vault_url: "http://localhost:8200".to_string(),
            broker_url: "http://localhost:8082".to_string(),
            consumer_group: "keel-runner".to_string(),
            poll_interval: Duration::from_secs(5),
            sync_timeout: Duration::from_secs(600), // 10 minutes
            http_timeout: Duration::from_secs(30),
            max_parallel_runs: 4,
            trigger_poll_interval: Duration::from_secs(2),
            control_image: "docker.io/alpine/k8s:1.30.0".to_string(),
            job_namespace: "default".to_string(),
            kubectl_path: "kubectl".to_string(),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Every variable is optional and falls back to the default:
    /// - RUNNER_ID
    /// - CONFIG_SERVICE_URL, VAULT_URL, BROKER_URL
    /// - CONSUMER_GROUP
    /// - POLL_INTERVAL, SYNC_TIMEOUT, HTTP_TIMEOUT, TRIGGER_POLL_INTERVAL (seconds)
    /// - MAX_PARALLEL_RUNS
    /// - CONTROL_IMAGE, JOB_NAMESPACE, KUBECTL_PATH
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            runner_id: env_string("RUNNER_ID").unwrap_or(defaults.runner_id),
            config_service_url: env_string("CONFIG_SERVICE_URL")
                .unwrap_or(defaults.config_service_url),
            vault_url: env_string("VAULT_URL").unwrap_or(defaults.vault_url),
            broker_url: env_string("BROKER_URL").unwrap_or(defaults.broker_url),
            consumer_group: env_string("CONSUMER_GROUP").unwrap_or(defaults.consumer_group),
            poll_interval: env_secs("POLL_INTERVAL").unwrap_or(defaults.poll_interval),
            sync_timeout: env_secs("SYNC_TIMEOUT").unwrap_or(defaults.sync_timeout),
            http_timeout: env_secs("HTTP_TIMEOUT").unwrap_or(defaults.http_timeout),
            max_parallel_runs: std::env::var("MAX_PARALLEL_RUNS")
                .ok()
                .and_then(|s| s.parse::<usize>().ok())
                .unwrap_or(defaults.max_parallel_runs),
            trigger_poll_interval: env_secs("TRIGGER_POLL_INTERVAL")
                .unwrap_or(defaults.trigger_poll_interval),
            control_image: env_string("CONTROL_IMAGE").unwrap_or(defaults.control_image),
            job_namespace: env_string("JOB_NAMESPACE").unwrap_or(defaults.job_namespace),
            kubectl_path: env_string("KUBECTL_PATH").unwrap_or(defaults.kubectl_path),
        }
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.runner_id.is_empty() {
            anyhow::bail!("runner_id cannot be empty");
        }

        for (name, url) in [
            ("config_service_url", &self.config_service_url),
            ("vault_url", &self.vault_url),
            ("broker_url", &self.broker_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                anyhow::bail!("{} must start with http:// or https://", name);
            }
        }

        if self.poll_interval.is_zero() {
            anyhow::bail!("poll_interval must be greater than 0");
        }

        if self.trigger_poll_interval.is_zero() {
            anyhow::bail!("trigger_poll_interval must be greater than 0");
        }

        if self.sync_timeout <= self.poll_interval {
            anyhow::bail!("sync_timeout must be greater than poll_interval");
        }

        if self.max_parallel_runs == 0 {
            anyhow::bail!("max_parallel_runs must be greater than 0");
        }

        if self.control_image.is_empty() {
            anyhow::bail!("control_image cannot be empty");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.trim().is_empty())
}

fn env_secs(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
}
