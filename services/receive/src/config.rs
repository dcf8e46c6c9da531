//! Configuration for the receive service.

use std::path::PathBuf;

use anyhow::{Context, Result};

/// Receive service configuration, loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Blob store base URL.
    pub blobstore_url: String,

    /// Control plane API URL.
    pub controller_url: String,

    /// Control plane auth key.
    pub controller_key: String,

    /// Registry for references that do not name one.
    pub registry: String,

    /// Working directory for unpacked layers and packaged images.
    pub data_dir: PathBuf,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// `FREIGHT_CONTROLLER_KEY` is required; everything else has a default.
    pub fn from_env() -> Result<Self> {
        let blobstore_url = std::env::var("FREIGHT_BLOBSTORE_URL")
            .unwrap_or_else(|_| "http://blobstore.internal".to_string());

        let controller_url = std::env::var("FREIGHT_CONTROLLER_URL")
            .unwrap_or_else(|_| "http://controller.internal".to_string());

        let controller_key =
            std::env::var("FREIGHT_CONTROLLER_KEY").context("FREIGHT_CONTROLLER_KEY not set")?;

        let registry = std::env::var("FREIGHT_REGISTRY_URL")
            .unwrap_or_else(|_| "registry-1.docker.io".to_string());

        let data_dir = std::env::var("FREIGHT_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/var/lib/freight/receive"));

        Ok(Self {
            blobstore_url,
            controller_url,
            controller_key,
            registry,
            data_dir,
        })
    }
}
