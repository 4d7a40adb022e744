//! Keel Runner
//!
//! A stateless worker that drives GitOps deployment steps for the pipeline engine.
//!
//! Architecture:
//! - Configuration: Load settings from environment or defaults
//! - Repositories: HTTP communication with the config service, secret store,
//!   event bus and GitOps controller, plus kubectl-driven preparation jobs
//! - Services: Sync, polling, log streaming, preparation and promotion
//! - Scheduler: Trigger consumption and the bounded worker pool
//!
//! The runner consumes sync and promote triggers, drives each one to exactly
//! one terminal status and reports progress on the event bus.

mod config;
mod context;
mod execution;
mod kubectl;
mod repository;
mod scheduler;
mod service;

#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::kubectl::KubectlJobRunner;
use crate::repository::{
    ConfigResolver, EventPublisher, HttpConfigRepository, HttpEventPublisher,
    HttpGitOpsConnector, HttpTriggerSource, HttpVaultRepository,
};
use crate::scheduler::Dispatcher;
use crate::service::{
    OperationPoller, PrepareSettings, PreparationJobExecutor, PromoteExecutor, SyncExecutor,
    ToolSessions, TriggerHandler,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keel_runner=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Keel Runner");

    let config = Config::from_env();
    config.validate().context("Invalid configuration")?;
    info!(
        "Loaded configuration: runner_id={}, config_service_url={}, broker_url={}",
        config.runner_id, config.config_service_url, config.broker_url
    );

    // Initialize repositories
    let settings: Arc<dyn ConfigResolver> = Arc::new(HttpConfigRepository::new(
        config.config_service_url.clone(),
        config.http_timeout,
    )?);
    let secrets = Arc::new(HttpVaultRepository::new(
        config.vault_url.clone(),
        config.http_timeout,
    )?);
    let publisher: Arc<dyn EventPublisher> = Arc::new(HttpEventPublisher::new(
        config.broker_url.clone(),
        config.http_timeout,
    )?);
    let connector = Arc::new(HttpGitOpsConnector::new(config.http_timeout)?);
    let triggers = Arc::new(HttpTriggerSource::new(
        config.broker_url.clone(),
        config.consumer_group.clone(),
        config.http_timeout,
    )?);
    let jobs = Arc::new(KubectlJobRunner::new(config.kubectl_path.clone()));

    info!("Repositories initialized");

    // Initialize services
    let sessions = Arc::new(ToolSessions::new(settings.clone(), secrets, connector));
    let sync = Arc::new(SyncExecutor::new(
        settings.clone(),
        sessions.clone(),
        OperationPoller::new(config.poll_interval, config.sync_timeout),
    ));
    let prepare = Arc::new(PreparationJobExecutor::new(
        settings.clone(),
        sessions.clone(),
        jobs,
        sync.clone(),
        publisher.clone(),
        PrepareSettings::from(&config),
    ));
    let promote = Arc::new(PromoteExecutor::new(settings.clone(), sessions));
    let handler = Arc::new(TriggerHandler::new(
        settings, publisher, sync, prepare, promote,
    ));

    info!("Services initialized");

    let dispatcher = Dispatcher::new(&config, triggers, handler);

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown requested, finishing in-flight runs");
                shutdown.cancel();
            }
            Err(e) => warn!("Failed to listen for shutdown signal: {}", e),
        }
    });

    info!(
        "Poll interval: {:?}, sync timeout: {:?}, workers: {}",
        config.poll_interval, config.sync_timeout, config.max_parallel_runs
    );

    if let Err(e) = dispatcher.run(cancel).await {
        error!("Dispatcher error: {:#}", e);
        return Err(e);
    }

    info!("Keel Runner stopped");
    Ok(())
}
