//! Trigger repository
//!
//! Reads sync and promote trigger messages from the event bus.

use anyhow::{Context, Result};
use async_trait::async_trait;
use keel_core::domain::run::{PipelineRunContext, RunAction};
use keel_core::dto::trigger::{PromoteTrigger, SyncTrigger};
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::warn;

use super::http_client;

/// Topic carrying sync step triggers
pub const SYNC_TRIGGER_TOPIC: &str = "gitops-sync-trigger";

/// Topic carrying promote/abort triggers
pub const PROMOTE_TRIGGER_TOPIC: &str = "gitops-promote-trigger";

/// An inbound request for one pipeline-step invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Sync(SyncTrigger),
    Promote(PromoteTrigger),
}

impl Trigger {
    /// Run context the trigger reports against
    pub fn to_context(&self) -> PipelineRunContext {
        match self {
            Trigger::Sync(trigger) => trigger.to_context(),
            Trigger::Promote(trigger) => trigger.to_context(),
        }
    }

    /// Whether handling the trigger publishes a terminal sequence
    pub fn requires_run(&self) -> bool {
        match self {
            Trigger::Sync(trigger) => trigger.action == RunAction::Start,
            Trigger::Promote(_) => true,
        }
    }
}

/// Repository trait for consuming triggers
#[async_trait]
pub trait TriggerSource: Send + Sync {
    /// Fetches the next batch of triggers, possibly empty
    async fn fetch(&self) -> Result<Vec<Trigger>>;
}

/// HTTP implementation of TriggerSource backed by the broker REST proxy
pub struct HttpTriggerSource {
    client: Client,
    broker_url: String,
    consumer_group: String,
}

impl HttpTriggerSource {
    /// Creates a new HTTP trigger source
    ///
    /// # Arguments
    /// * `broker_url` - Base URL of the broker REST proxy
    /// * `consumer_group` - Consumer group whose offsets the proxy tracks
    /// * `request_timeout` - Ceiling for one consume request
    pub fn new(
        broker_url: String,
        consumer_group: String,
        request_timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            client: http_client(request_timeout)?,
            broker_url: broker_url.trim_end_matches('/').to_string(),
            consumer_group,
        })
    }

    async fn fetch_topic<T: DeserializeOwned>(&self, topic: &str) -> Result<Vec<T>> {
        let url = format!("{}/topics/{}/records", self.broker_url, topic);

        let response = self
            .client
            .get(&url)
            .query(&[("group", self.consumer_group.as_str())])
            .send()
            .await
            .with_context(|| format!("Failed to consume {}", topic))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Failed to consume {}: {} - {}", topic, status, body);
        }

        let records = response
            .json::<Vec<ConsumedRecord>>()
            .await
            .with_context(|| format!("Failed to parse records from {}", topic))?;

        Ok(decode_records(topic, records))
    }
}

#[derive(Deserialize)]
struct ConsumedRecord {
    value: JsonValue,
}

/// Decodes record values, dropping (and logging) malformed ones
fn decode_records<T: DeserializeOwned>(topic: &str, records: Vec<ConsumedRecord>) -> Vec<T> {
    records
        .into_iter()
        .filter_map(|record| match serde_json::from_value(record.value) {
            Ok(trigger) => Some(trigger),
            Err(e) => {
                warn!("Dropping malformed record on {}: {}", topic, e);
                None
            }
        })
        .collect()
}

#[async_trait]
impl TriggerSource for HttpTriggerSource {
    async fn fetch(&self) -> Result<Vec<Trigger>> {
        let mut triggers: Vec<Trigger> = self
            .fetch_topic::<SyncTrigger>(SYNC_TRIGGER_TOPIC)
            .await?
            .into_iter()
            .map(Trigger::Sync)
            .collect();

        triggers.extend(
            self.fetch_topic::<PromoteTrigger>(PROMOTE_TRIGGER_TOPIC)
                .await?
                .into_iter()
                .map(Trigger::Promote),
        );

        Ok(triggers)
    }
}
