//! Secret store repository
//!
//! Resolves credential material by owner and key. Values travel base64-encoded
//! and are decoded here; callers only ever see plaintext in memory, and nothing
//! in this module logs a value.

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use super::http_client;

/// Repository trait for secret lookups
#[async_trait]
pub trait SecretResolver: Send + Sync {
    /// Returns the plaintext secret stored under `key` for `owner_id`
    async fn get_secret(&self, owner_id: &str, key: &str) -> Result<String>;
}

/// HTTP implementation of SecretResolver
pub struct HttpVaultRepository {
    client: Client,
    vault_url: String,
}

impl HttpVaultRepository {
    /// Creates a new HTTP secret repository
    ///
    /// # Arguments
    /// * `vault_url` - Base URL of the secret store (e.g., "http://localhost:8200")
    /// * `request_timeout` - Ceiling for one read
    pub fn new(vault_url: String, request_timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(request_timeout)?,
            vault_url: vault_url.trim_end_matches('/').to_string(),
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReadSecretsRequest<'a> {
    owner_id: &'a str,
    keys: Vec<&'a str>,
}

#[derive(Deserialize)]
struct ReadSecretsResponse {
    #[serde(default)]
    data: HashMap<String, String>,
}

#[async_trait]
impl SecretResolver for HttpVaultRepository {
    async fn get_secret(&self, owner_id: &str, key: &str) -> Result<String> {
        let url = format!("{}/v1/secrets/read", self.vault_url);

        let response = self
            .client
            .post(&url)
            .json(&ReadSecretsRequest {
                owner_id,
                keys: vec![key],
            })
            .send()
            .await
            .context("Failed to reach secret store")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Failed to read secret {}: {} - {}", key, status, body);
        }

        let body = response
            .json::<ReadSecretsResponse>()
            .await
            .context("Failed to parse secret store response")?;

        let encoded = body
            .data
            .get(key)
            .ok_or_else(|| anyhow::anyhow!("Secret {} not found for owner {}", key, owner_id))?;

        decode_secret(encoded).with_context(|| format!("Secret {} is not valid base64", key))
    }
}

fn decode_secret(encoded: &str) -> Result<String> {
    let bytes = STANDARD.decode(encoded.trim())?;
    Ok(String::from_utf8(bytes)?)
}
