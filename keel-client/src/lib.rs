//! Keel GitOps Client
//!
//! A type-safe HTTP client for the GitOps controller API.
//!
//! The client owns a session token obtained from the controller's session
//! endpoint and attaches it to every subsequent call. Responses are deserialized
//! into the typed views from `keel_core::domain::application`.
//!
//! # Example
//!
//! ```no_run
//! use keel_client::GitOpsClient;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = GitOpsClient::new("https://argocd.example.com")
//!         .login("admin", "password")
//!         .await?;
//!
//!     let app = client.sync_application("guestbook").await?;
//!     println!("Sync requested for {}", app.name());
//!     Ok(())
//! }
//! ```

mod applications;
pub mod error;
mod session;

// Re-export commonly used types
pub use error::{ClientError, Result};
pub use applications::ResourceActionTarget;

use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;

/// HTTP client for the GitOps controller API
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Clone)]
pub struct GitOpsClient {
    /// Base URL of the controller (e.g., "https://argocd.example.com")
    base_url: String,
    /// HTTP client instance
    client: Client,
    /// Bearer token from the session endpoint
    token: Option<String>,
}

impl std::fmt::Debug for GitOpsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitOpsClient")
            .field("base_url", &self.base_url)
            .field("authenticated", &self.token.is_some())
            .finish()
    }
}

impl GitOpsClient {
    /// Create a new, unauthenticated client
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the controller API
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a new client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    ///
    /// # Example
    /// ```
    /// use keel_client::GitOpsClient;
    /// use reqwest::Client;
    /// use std::time::Duration;
    ///
    /// let http_client = Client::builder()
    ///     .timeout(Duration::from_secs(30))
    ///     .build()
    ///     .unwrap();
    ///
    /// let client = GitOpsClient::with_client("https://argocd.example.com", http_client);
    /// ```
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            token: None,
        }
    }

    /// Use an already issued bearer token
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Get the base URL of the controller
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Whether a session token is attached
    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Attach the bearer token, if any
    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Check the status code and deserialize the JSON body
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let response = Self::check_status(response).await?;

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }

    /// Check the status code and return the raw body
    async fn handle_text_response(&self, response: reqwest::Response) -> Result<String> {
        let response = Self::check_status(response).await?;
        Ok(response.text().await?)
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        Ok(response)
    }
}
