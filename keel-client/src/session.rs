//! Session endpoint

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::GitOpsClient;
use crate::error::{ClientError, Result};

#[derive(Serialize)]
struct SessionRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct SessionResponse {
    #[serde(default)]
    token: String,
}

impl GitOpsClient {
    /// Exchange username/password for a bearer token
    ///
    /// # Returns
    /// The issued token
    pub async fn create_session(&self, username: &str, password: &str) -> Result<String> {
        let url = self.url("/api/v1/session");
        let response = self
            .client
            .post(&url)
            .json(&SessionRequest { username, password })
            .send()
            .await?;

        let session: SessionResponse = self.handle_response(response).await?;
        if session.token.is_empty() {
            return Err(ClientError::Unauthorized(
                "Session endpoint returned an empty token".to_string(),
            ));
        }

        debug!("Session created for user {}", username);
        Ok(session.token)
    }

    /// Authenticate and return a client carrying the session token
    pub async fn login(self, username: &str, password: &str) -> Result<Self> {
        let token = self.create_session(username, password).await?;
        Ok(self.with_token(token))
    }
}
