//! Content-addressed layer cache backed by the blob store.
//!
//! Lookups are keyed by the layer's stable id, so repeated builds of the
//! same source image skip re-packaging identical layers. The packaged blob
//! itself is keyed by its own content hash, so unrelated images that share
//! a layer deduplicate globally.
//!
//! `save` is a two-phase commit: the packaged blob is written first, and the
//! descriptor referencing it is written only after the blob write succeeds.
//! A crash between the phases leaves the lookup absent — the next run
//! reconverts — and a reader who finds a descriptor can always fetch the
//! blob it points to.

use bytes::Bytes;
use freight_blobstore::{BlobClient, StoreError};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::convert::PackagedLayer;
use crate::manifest::{LayerDescriptor, HASH_ALGORITHM};

/// Errors from layer cache operations.
#[derive(Debug, Error)]
pub enum LayerError {
    #[error("blob store error: {0}")]
    Store(#[from] StoreError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("packaged layer {0} has no sha512 hash")]
    MissingHash(String),
}

/// Layer cache over the blob store.
#[derive(Debug, Clone)]
pub struct LayerStore {
    blobs: BlobClient,
    base_url: String,
}

impl LayerStore {
    /// Create a layer store rooted at the blob store base URL.
    pub fn new(blobs: BlobClient, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { blobs, base_url }
    }

    /// Lookup URL for a layer id. A fixed naming convention, not a content
    /// hash: the layer's packaged content is unknown before conversion.
    fn lookup_url(&self, layer_id: &str) -> String {
        format!("{}/image-receive/layers/{layer_id}.json", self.base_url)
    }

    /// Content-addressed URL for a packaged layer blob.
    fn blob_url(&self, digest: &str) -> String {
        format!("{}/image-receive/layers/{digest}.squashfs", self.base_url)
    }

    /// Look up a previously committed layer.
    ///
    /// `Ok(None)` is the expected outcome for a never-before-seen layer and
    /// triggers conversion; it is not an error.
    pub async fn load(&self, layer_id: &str) -> Result<Option<LayerDescriptor>, LayerError> {
        let url = self.lookup_url(layer_id);
        match self.blobs.get(&url).await? {
            Some(body) => {
                let descriptor: LayerDescriptor = serde_json::from_slice(&body)?;
                // A committed descriptor always carries the URL its blob was
                // written to; one without it cannot be fetched and reads as
                // a miss, which triggers a clean reconversion.
                if descriptor.url.is_empty() {
                    warn!(layer = %layer_id, "Stored descriptor has no blob URL, reconverting");
                    return Ok(None);
                }
                debug!(layer = %layer_id, url = %descriptor.url, "Layer cache hit");
                Ok(Some(descriptor))
            }
            None => {
                debug!(layer = %layer_id, "Layer cache miss");
                Ok(None)
            }
        }
    }

    /// Commit a packaged layer: blob first, then descriptor.
    ///
    /// Phase 1 failure has no visible effect. Phase 2 never starts before
    /// phase 1's success is confirmed, so the lookup never points at a
    /// missing blob.
    pub async fn save(
        &self,
        layer_id: &str,
        packaged: &PackagedLayer,
    ) -> Result<LayerDescriptor, LayerError> {
        let digest = packaged
            .hashes
            .get(HASH_ALGORITHM)
            .ok_or_else(|| LayerError::MissingHash(layer_id.to_string()))?;

        let url = self.blob_url(digest);
        self.blobs.put_file(&url, &packaged.path).await?;

        let descriptor = LayerDescriptor {
            id: layer_id.to_string(),
            url,
            hashes: packaged.hashes.clone(),
            size: packaged.size,
        };

        let body = serde_json::to_vec(&descriptor)?;
        self.blobs
            .put_bytes(&self.lookup_url(layer_id), Bytes::from(body))
            .await?;

        info!(
            layer = %layer_id,
            url = %descriptor.url,
            size_bytes = descriptor.size,
            "Layer committed"
        );

        Ok(descriptor)
    }
}
