//! Image source boundary: pulling an image and exposing its layer chain.
//!
//! The pipeline only needs the [`ImageSource`] trait: given a reference
//! string, yield a resolved image with a stable name, a stable content id,
//! and an ordered chain of layers whose filesystem diffs sit in local
//! directories. [`RegistrySource`] is the concrete implementation that pulls
//! from an OCI registry; tests substitute in-memory fakes.

use std::collections::BTreeMap;
use std::fs;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use flate2::read::GzDecoder;
use reqwest::StatusCode;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tar::Archive;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::manifest::ImageConfig;

/// Errors from pulling and unpacking an image.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("image not found: {0}")]
    NotFound(String),

    #[error("invalid image reference: {0}")]
    InvalidReference(String),

    #[error("unsupported image: {0}")]
    Unsupported(String),
}

/// One layer of a pulled image, extracted to a local directory.
#[derive(Debug, Clone)]
pub struct PulledLayer {
    /// Stable layer identifier (the layer's registry digest).
    pub id: String,
    /// Directory holding the layer's extracted filesystem diff.
    pub rootfs: PathBuf,
}

/// A pulled image, resolved to its layer chain and configuration.
#[derive(Debug, Clone)]
pub struct PulledImage {
    /// Stable repository name.
    pub name: String,
    /// Stable content id of the image (the manifest digest).
    pub id: String,
    /// Layer chain in application order, top layer last.
    pub layers: Vec<PulledLayer>,
    /// Run configuration carried into the artifact manifest.
    pub config: ImageConfig,
}

/// Capability to pull an image reference.
#[async_trait]
pub trait ImageSource {
    async fn pull(&self, reference: &str) -> Result<PulledImage, SourceError>;
}

/// Configuration for [`RegistrySource`].
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Default registry for references that do not name one.
    pub default_registry: String,
    /// Directory for per-layer extracted filesystem diffs.
    pub unpack_dir: PathBuf,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            default_registry: "registry-1.docker.io".to_string(),
            unpack_dir: PathBuf::from("/var/lib/freight/receive/unpacked"),
        }
    }
}

/// OCI registry source.
///
/// Pulls the manifest and config for a reference, downloads each layer blob
/// with digest verification, and unpacks every layer tarball into its own
/// diff directory. Anonymous pulls only; registries requiring token auth
/// are out of scope.
pub struct RegistrySource {
    config: RegistryConfig,
    client: reqwest::Client,
}

impl RegistrySource {
    pub fn new(config: RegistryConfig) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self { config, client })
    }

    async fn fetch_manifest(
        &self,
        registry: &str,
        repo: &str,
        reference: &str,
    ) -> Result<(RegistryManifest, String), SourceError> {
        let url = format!("https://{registry}/v2/{repo}/manifests/{reference}");
        debug!(url = %url, "Fetching manifest");

        let response = self
            .client
            .get(&url)
            .header(
                "Accept",
                "application/vnd.oci.image.manifest.v1+json, application/vnd.docker.distribution.manifest.v2+json",
            )
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => {
                let body = response.bytes().await?;
                let digest = format!("sha256:{}", hex::encode(Sha256::digest(&body)));

                // A reference pinned by digest must hash to that digest.
                if reference.starts_with("sha256:") && reference != digest {
                    return Err(SourceError::DigestMismatch {
                        expected: reference.to_string(),
                        actual: digest,
                    });
                }

                let raw: serde_json::Value = serde_json::from_slice(&body)?;
                if raw.get("manifests").is_some() {
                    return Err(SourceError::Unsupported(
                        "multi-platform manifest index; pull a platform-specific digest"
                            .to_string(),
                    ));
                }

                let manifest: RegistryManifest = serde_json::from_slice(&body)?;
                Ok((manifest, digest))
            }
            StatusCode::NOT_FOUND => Err(SourceError::NotFound(format!("{repo}:{reference}"))),
            status => Err(SourceError::Unsupported(format!(
                "registry answered {status} for {url}"
            ))),
        }
    }

    async fn fetch_blob(
        &self,
        registry: &str,
        repo: &str,
        digest: &str,
    ) -> Result<bytes::Bytes, SourceError> {
        let url = format!("https://{registry}/v2/{repo}/blobs/{digest}");
        debug!(url = %url, "Fetching blob");

        let response = self.client.get(&url).send().await?;
        match response.status() {
            StatusCode::OK => {
                let body = response.bytes().await?;
                let computed = format!("sha256:{}", hex::encode(Sha256::digest(&body)));
                if computed != digest {
                    return Err(SourceError::DigestMismatch {
                        expected: digest.to_string(),
                        actual: computed,
                    });
                }
                Ok(body)
            }
            StatusCode::NOT_FOUND => Err(SourceError::NotFound(digest.to_string())),
            status => Err(SourceError::Unsupported(format!(
                "registry answered {status} for {url}"
            ))),
        }
    }

    /// Unpack a layer tarball (gzip or raw tar) into its own diff directory.
    ///
    /// Two-phase: the archive is extracted into a temporary sibling and
    /// renamed into place only after extraction completes, so the diff
    /// directory is never visible half-written. A crash mid-extraction
    /// leaves only the temporary directory behind, and the next run
    /// re-extracts from scratch.
    fn unpack_layer(&self, digest: &str, blob: &[u8]) -> Result<PathBuf, SourceError> {
        let dest = self.config.unpack_dir.join(sanitize_digest(digest));
        if dest.is_dir() {
            debug!(digest = %digest, "Layer diff already unpacked");
            return Ok(dest);
        }

        let staging = self
            .config
            .unpack_dir
            .join(format!("{}.tmp-{}", sanitize_digest(digest), std::process::id()));
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        fs::create_dir_all(&staging)?;

        let reader = BufReader::new(blob);
        let extracted = if blob.starts_with(&[0x1f, 0x8b]) {
            extract_archive(&mut Archive::new(GzDecoder::new(reader)), &staging)
        } else {
            extract_archive(&mut Archive::new(reader), &staging)
        };
        if let Err(e) = extracted {
            fs::remove_dir_all(&staging).ok();
            return Err(e);
        }

        match fs::rename(&staging, &dest) {
            Ok(()) => Ok(dest),
            // Another run committed the same layer first; its copy is
            // complete, so reuse it.
            Err(_) if dest.is_dir() => {
                fs::remove_dir_all(&staging).ok();
                Ok(dest)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ImageSource for RegistrySource {
    async fn pull(&self, reference: &str) -> Result<PulledImage, SourceError> {
        let (registry, repo, tag_or_digest) =
            parse_image_ref(reference, &self.config.default_registry)?;

        let (manifest, image_id) = self
            .fetch_manifest(&registry, &repo, &tag_or_digest)
            .await?;

        info!(
            image = %reference,
            id = %image_id,
            layer_count = manifest.layers.len(),
            "Pulling image"
        );

        let config_blob = self
            .fetch_blob(&registry, &repo, &manifest.config.digest)
            .await?;
        let config = parse_image_config(&config_blob)?;

        let mut layers = Vec::with_capacity(manifest.layers.len());
        for (i, layer) in manifest.layers.iter().enumerate() {
            info!(
                layer = i,
                digest = %layer.digest,
                size = layer.size,
                "Pulling layer"
            );
            let blob = self.fetch_blob(&registry, &repo, &layer.digest).await?;
            let rootfs = self.unpack_layer(&layer.digest, &blob)?;
            layers.push(PulledLayer {
                id: layer.digest.clone(),
                rootfs,
            });
        }

        Ok(PulledImage {
            name: repo,
            id: image_id,
            layers,
            config,
        })
    }
}

/// Registry image manifest (OCI / Docker schema 2).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegistryManifest {
    #[allow(dead_code)]
    schema_version: u32,
    config: RegistryDescriptor,
    layers: Vec<RegistryDescriptor>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegistryDescriptor {
    digest: String,
    #[serde(default)]
    size: u64,
}

/// Map a registry image config blob onto [`ImageConfig`].
fn parse_image_config(blob: &[u8]) -> Result<ImageConfig, SourceError> {
    #[derive(Deserialize)]
    struct ConfigBlob {
        #[serde(default)]
        config: RunConfig,
    }

    #[derive(Default, Deserialize)]
    struct RunConfig {
        #[serde(rename = "Entrypoint", default)]
        entrypoint: Option<Vec<String>>,
        #[serde(rename = "Cmd", default)]
        cmd: Option<Vec<String>>,
        #[serde(rename = "Env", default)]
        env: Option<Vec<String>>,
        #[serde(rename = "WorkingDir", default)]
        working_dir: Option<String>,
    }

    let parsed: ConfigBlob = serde_json::from_slice(blob)?;
    let run = parsed.config;

    let mut env = BTreeMap::new();
    for entry in run.env.unwrap_or_default() {
        match entry.split_once('=') {
            Some((key, value)) => {
                env.insert(key.to_string(), value.to_string());
            }
            None => warn!(entry = %entry, "Skipping malformed env entry"),
        }
    }

    Ok(ImageConfig {
        entrypoint: run.entrypoint.unwrap_or_default(),
        cmd: run.cmd.unwrap_or_default(),
        env,
        working_dir: run.working_dir.filter(|dir| !dir.is_empty()),
    })
}

/// Extract a tar archive into `dest`.
///
/// `unpack_in` confines every entry to `dest`, rejecting both `..`
/// components and writes through symlinked ancestors. Entries it refuses
/// are skipped. Whiteout markers are kept as-is: a layer diff carries its
/// deletions, and the packaged layer must reproduce them.
fn extract_archive<R: Read>(archive: &mut Archive<R>, dest: &Path) -> Result<(), SourceError> {
    for entry in archive.entries()? {
        let mut entry = entry?;
        if !entry.unpack_in(dest)? {
            warn!(path = %entry.path()?.display(), "Skipping entry escaping the layer root");
        }
    }
    Ok(())
}

/// Sanitize a digest for use in file paths.
fn sanitize_digest(digest: &str) -> String {
    digest.replace([':', '/'], "_")
}

/// Parse an image reference into registry, repo, and tag/digest.
///
/// Examples:
/// - `alpine:3.20` -> (default registry, library/alpine, 3.20)
/// - `ghcr.io/org/app@sha256:abc...` -> (ghcr.io, org/app, sha256:abc...)
pub fn parse_image_ref(
    image_ref: &str,
    default_registry: &str,
) -> Result<(String, String, String), SourceError> {
    if image_ref.is_empty() {
        return Err(SourceError::InvalidReference("empty reference".into()));
    }

    let (name_part, reference) = if let Some((name, digest)) = image_ref.rsplit_once('@') {
        (name, digest.to_string())
    } else if let Some((name, tag)) = image_ref.rsplit_once(':') {
        if tag.contains('/') {
            // The colon belongs to a registry port, not a tag.
            (image_ref, "latest".to_string())
        } else {
            (name, tag.to_string())
        }
    } else {
        (image_ref, "latest".to_string())
    };

    let parts: Vec<&str> = name_part.splitn(2, '/').collect();
    let (registry, repo) = if parts.len() == 1 {
        (default_registry.to_string(), format!("library/{}", parts[0]))
    } else if parts[0].contains('.') || parts[0].contains(':') || parts[0] == "localhost" {
        (parts[0].to_string(), parts[1].to_string())
    } else {
        (default_registry.to_string(), name_part.to_string())
    };

    Ok((registry, repo, reference))
}
