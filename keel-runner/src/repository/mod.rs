//! Repository layer
//!
//! Repositories are stateless adapters over the runner's external collaborators:
//! the GitOps controller, the secret store, the configuration service and the
//! event bus. They provide focused interfaces without any business logic.
//!
//! All repositories are trait-based so services can be tested against fakes.

use anyhow::{Context, Result};
use reqwest::Client;
use std::time::Duration;

mod events;
mod gitops;
mod secrets;
mod settings;
mod triggers;

// Re-export traits
pub use events::EventPublisher;
pub use gitops::{GitOpsApi, GitOpsConnector};
pub use secrets::SecretResolver;
pub use settings::ConfigResolver;
pub use triggers::{Trigger, TriggerSource};

// Re-export implementations
pub use events::HttpEventPublisher;
pub use gitops::HttpGitOpsConnector;
pub use secrets::HttpVaultRepository;
pub use settings::HttpConfigRepository;
pub use triggers::HttpTriggerSource;

/// HTTP client shared by the adapters of one collaborator
///
/// Every request is bounded by `request_timeout`, so a hung collaborator
/// surfaces as an error instead of holding a worker.
pub(crate) fn http_client(request_timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(request_timeout)
        .build()
        .context("Failed to build HTTP client")
}
