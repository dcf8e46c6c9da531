//! Layer converter boundary: packaging a filesystem diff into a read-only
//! filesystem image.
//!
//! The pipeline only depends on the [`LayerConverter`] trait; tests use
//! in-memory fakes. [`SquashfsConverter`] is the real implementation,
//! shelling out to `mksquashfs`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;
use tracing::{debug, info};

use crate::manifest::HASH_ALGORITHM;

/// Errors from packaging a layer.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("filesystem image creation failed: {0}")]
    PackFailed(String),
}

/// A packaged layer: the filesystem image file plus its content hashes.
#[derive(Debug, Clone)]
pub struct PackagedLayer {
    /// Path to the packaged filesystem image.
    pub path: PathBuf,
    /// Algorithm name → hex digest of the packaged bytes.
    pub hashes: BTreeMap<String, String>,
    /// Size of the packaged file in bytes.
    pub size: u64,
}

/// Capability to package one layer's extracted filesystem.
pub trait LayerConverter {
    fn convert(&self, layer_id: &str, rootfs: &Path) -> Result<PackagedLayer, ConvertError>;
}

/// Configuration for [`SquashfsConverter`].
#[derive(Debug, Clone)]
pub struct SquashfsConfig {
    /// Directory for packaged squashfs images.
    pub output_dir: PathBuf,
}

impl Default for SquashfsConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("/var/lib/freight/receive/squashfs"),
        }
    }
}

/// Packages a layer diff directory into a squashfs image via `mksquashfs`.
pub struct SquashfsConverter {
    config: SquashfsConfig,
}

impl SquashfsConverter {
    pub fn new(config: SquashfsConfig) -> Self {
        Self { config }
    }

    /// Output path for a layer's packaged image.
    fn output_path(&self, layer_id: &str) -> PathBuf {
        let sanitized = layer_id.replace([':', '/'], "_");
        self.config.output_dir.join(format!("{sanitized}.squashfs"))
    }
}

impl LayerConverter for SquashfsConverter {
    fn convert(&self, layer_id: &str, rootfs: &Path) -> Result<PackagedLayer, ConvertError> {
        fs::create_dir_all(&self.config.output_dir)?;
        let output = self.output_path(layer_id);

        // mksquashfs appends into an existing archive; a stale file from a
        // crashed run must go first.
        if output.exists() {
            fs::remove_file(&output)?;
        }

        debug!(
            layer = %layer_id,
            rootfs = %rootfs.display(),
            output = %output.display(),
            "Packaging layer"
        );

        let status = Command::new("mksquashfs")
            .arg(rootfs)
            .arg(&output)
            .args(["-noappend", "-quiet", "-no-progress"])
            .status()
            .map_err(|e| ConvertError::PackFailed(format!("mksquashfs: {e}")))?;

        if !status.success() {
            return Err(ConvertError::PackFailed(format!(
                "mksquashfs exited with {status}"
            )));
        }

        let size = fs::metadata(&output)?.len();
        let digest = freight_blobstore::sha512_hex_file(&output)?;

        info!(
            layer = %layer_id,
            size_bytes = size,
            "Layer packaged"
        );

        Ok(PackagedLayer {
            path: output,
            hashes: BTreeMap::from([(HASH_ALGORITHM.to_string(), digest)]),
            size,
        })
    }
}
