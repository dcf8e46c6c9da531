//! Control plane API client.
//!
//! The receive pipeline has exactly one control plane interaction:
//! registering the finished artifact record. Registration failure is fatal
//! to the run; already-uploaded blobs stay in the store as harmless
//! content-addressed orphans.

use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;
use tracing::{debug, info};

use crate::manifest::Artifact;

/// Errors from control plane calls.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("controller rejected artifact: {status}: {body}")]
    Rejected { status: StatusCode, body: String },
}

/// Control plane API client.
///
/// Authenticates with the controller key as the HTTP basic-auth password
/// (empty username) on every request.
pub struct ControllerClient {
    client: reqwest::Client,
    base_url: String,
    key: String,
}

impl ControllerClient {
    pub fn new(base_url: &str, key: &str) -> Result<Self, ControllerError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            key: key.to_string(),
        })
    }

    /// Register an artifact record. Ownership passes to the control plane
    /// on success.
    pub async fn create_artifact(&self, artifact: &Artifact) -> Result<(), ControllerError> {
        let url = format!("{}/artifacts", self.base_url);
        debug!(url = %url, uri = %artifact.uri, "Registering artifact");

        let response = self
            .client
            .post(&url)
            .basic_auth("", Some(&self.key))
            .json(artifact)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ControllerError::Rejected { status, body });
        }

        info!(uri = %artifact.uri, "Artifact registered");
        Ok(())
    }
}
