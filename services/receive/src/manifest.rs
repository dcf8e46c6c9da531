//! Data model for freight image artifacts.
//!
//! A published image is described by three records:
//!
//! - [`LayerDescriptor`]: one filesystem layer, located by content-addressed
//!   URL and described by a map of content hashes
//! - [`ImageManifest`]: the ordered layer chain plus run configuration
//! - [`Artifact`]: the platform-visible pointer to an uploaded manifest
//!
//! All references between records are content-addressed URLs, never mutable
//! pointers, so a consumer can verify anything it fetches by rehashing.
//! Maps are `BTreeMap` so repeated builds of the same image serialize to
//! byte-identical JSON.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Artifact type tag for platform-native images.
pub const ARTIFACT_TYPE: &str = "freight";

/// Hash algorithm used for content addressing.
pub const HASH_ALGORITHM: &str = "sha512";

/// One filesystem layer of an image.
///
/// `id` is the stable identifier assigned by the image source; `url` is
/// assigned only after the packaged layer bytes are fully written to the
/// blob store. A committed descriptor is never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerDescriptor {
    /// Stable layer identifier from the source image.
    pub id: String,

    /// Content-addressed URL of the packaged filesystem image.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,

    /// Algorithm name → hex digest of the packaged bytes.
    pub hashes: BTreeMap<String, String>,

    /// Size of the packaged filesystem image in bytes.
    pub size: u64,
}

/// Run configuration carried from the source image into the manifest.
///
/// Opaque to the pipeline; the platform interprets it at instantiation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entrypoint: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cmd: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
}

/// Full description of an image artifact.
///
/// Layer order is application order, top layer last. Immutable once
/// serialized; published only when every descriptor carries a non-empty
/// `url`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageManifest {
    pub layers: Vec<LayerDescriptor>,
    pub config: ImageConfig,
}

impl ImageManifest {
    /// Serialize to the canonical JSON bytes that get uploaded and hashed.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// The platform-registered record pointing at a published manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Platform-native artifact type tag ([`ARTIFACT_TYPE`]).
    #[serde(rename = "type")]
    pub kind: String,

    /// Content-addressed URL of the uploaded image manifest.
    pub uri: String,

    /// Provenance metadata (source repository, source content digest).
    pub meta: BTreeMap<String, String>,

    /// The manifest the `uri` points at, embedded for the control plane.
    pub manifest: ImageManifest,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_manifest() -> ImageManifest {
        ImageManifest {
            layers: vec![
                LayerDescriptor {
                    id: "sha256:base".into(),
                    url: "http://store/image-receive/layers/aa.squashfs".into(),
                    hashes: BTreeMap::from([(HASH_ALGORITHM.to_string(), "aa".to_string())]),
                    size: 2,
                },
                LayerDescriptor {
                    id: "sha256:app".into(),
                    url: "http://store/image-receive/layers/bb.squashfs".into(),
                    hashes: BTreeMap::from([(HASH_ALGORITHM.to_string(), "bb".to_string())]),
                    size: 4,
                },
            ],
            config: ImageConfig {
                entrypoint: vec!["/bin/app".into()],
                env: BTreeMap::from([("PORT".into(), "8080".into())]),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_manifest_serialization_is_deterministic() {
        let a = sample_manifest().to_bytes().unwrap();
        let b = sample_manifest().to_bytes().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_manifest_preserves_layer_order() {
        let bytes = sample_manifest().to_bytes().unwrap();
        let parsed: ImageManifest = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed.layers[0].id, "sha256:base");
        assert_eq!(parsed.layers[1].id, "sha256:app");
    }

    #[test]
    fn test_descriptor_url_omitted_until_assigned() {
        let descriptor = LayerDescriptor {
            id: "sha256:pending".into(),
            url: String::new(),
            hashes: BTreeMap::new(),
            size: 0,
        };
        let json = serde_json::to_string(&descriptor).unwrap();
        assert!(!json.contains("url"));
    }

    #[test]
    fn test_artifact_type_field_name() {
        let artifact = Artifact {
            kind: ARTIFACT_TYPE.into(),
            uri: "http://store/image-receive/images/cc.json".into(),
            meta: BTreeMap::new(),
            manifest: sample_manifest(),
        };
        let json = serde_json::to_string(&artifact).unwrap();
        assert!(json.contains(r#""type":"freight""#));
    }
}
