//! Event bus repository
//!
//! Publishes JSON payloads to named topics through the broker's REST proxy.

use anyhow::{Context, Result};
use async_trait::async_trait;
use keel_core::dto::event::Topic;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::time::Duration;

use super::http_client;

/// Repository trait for event publication
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes one payload to a topic
    ///
    /// Returns once the broker accepted the record. Callers that publish a
    /// sequence await each call so records are issued in program order.
    async fn publish(&self, topic: Topic, payload: JsonValue) -> Result<()>;
}

/// HTTP implementation of EventPublisher
pub struct HttpEventPublisher {
    client: Client,
    broker_url: String,
}

impl HttpEventPublisher {
    /// Creates a new HTTP event publisher
    ///
    /// # Arguments
    /// * `broker_url` - Base URL of the broker REST proxy
    /// * `request_timeout` - Ceiling for one publish request
    pub fn new(broker_url: String, request_timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(request_timeout)?,
            broker_url: broker_url.trim_end_matches('/').to_string(),
        })
    }
}

#[derive(Serialize)]
struct ProduceRequest {
    records: Vec<ProduceRecord>,
}

#[derive(Serialize)]
struct ProduceRecord {
    value: JsonValue,
}

#[async_trait]
impl EventPublisher for HttpEventPublisher {
    async fn publish(&self, topic: Topic, payload: JsonValue) -> Result<()> {
        let url = format!("{}/topics/{}", self.broker_url, topic.name());

        let response = self
            .client
            .post(&url)
            .json(&ProduceRequest {
                records: vec![ProduceRecord { value: payload }],
            })
            .send()
            .await
            .with_context(|| format!("Failed to publish to {}", topic))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Failed to publish to {}: {} - {}", topic, status, body);
        }

        Ok(())
    }
}
