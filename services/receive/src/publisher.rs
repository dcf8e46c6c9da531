//! Artifact publisher: uploads the manifest and registers the artifact.
//!
//! The manifest is serialized once, named by the digest of those exact
//! bytes, and PUT to the manifest namespace. Identical manifests resolve to
//! identical URLs, so a re-run after a failed registration re-PUTs the same
//! bytes to the same location — an effect-free overwrite.

use std::collections::BTreeMap;

use bytes::Bytes;
use freight_blobstore::{sha512_hex, BlobClient, StoreError};
use thiserror::Error;
use tracing::info;

use crate::controller::{ControllerClient, ControllerError};
use crate::manifest::{Artifact, ImageManifest, ARTIFACT_TYPE};

/// Errors from publishing an artifact.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("blob store error: {0}")]
    Store(#[from] StoreError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("registration error: {0}")]
    Registration(#[from] ControllerError),

    #[error("layer {0} has no blob URL; manifest is not publishable")]
    IncompleteManifest(String),
}

/// Uploads manifests to the blob store and registers artifacts with the
/// control plane.
pub struct Publisher {
    blobs: BlobClient,
    controller: ControllerClient,
    base_url: String,
}

impl Publisher {
    pub fn new(blobs: BlobClient, controller: ControllerClient, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            blobs,
            controller,
            base_url,
        }
    }

    /// Content-addressed URL for a serialized manifest.
    fn manifest_url(&self, digest: &str) -> String {
        format!("{}/image-receive/images/{digest}.json", self.base_url)
    }

    /// Upload the manifest and register the artifact record.
    ///
    /// `repository` and `source_digest` become provenance metadata on the
    /// artifact: the source image's name and content id.
    pub async fn publish(
        &self,
        repository: &str,
        source_digest: &str,
        manifest: ImageManifest,
    ) -> Result<Artifact, PublishError> {
        // Every descriptor must be addressable before the manifest is.
        if let Some(layer) = manifest.layers.iter().find(|l| l.url.is_empty()) {
            return Err(PublishError::IncompleteManifest(layer.id.clone()));
        }

        let body = manifest.to_bytes()?;
        let uri = self.manifest_url(&sha512_hex(&body));

        self.blobs.put_bytes(&uri, Bytes::from(body)).await?;

        let artifact = Artifact {
            kind: ARTIFACT_TYPE.to_string(),
            uri: uri.clone(),
            meta: BTreeMap::from([
                ("blobstore".to_string(), "true".to_string()),
                (
                    "image-receive.repository".to_string(),
                    repository.to_string(),
                ),
                (
                    "image-receive.digest".to_string(),
                    source_digest.to_string(),
                ),
            ]),
            manifest,
        };

        self.controller.create_artifact(&artifact).await?;

        info!(
            repository = %repository,
            uri = %uri,
            "Artifact published"
        );

        Ok(artifact)
    }
}
