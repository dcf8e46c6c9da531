//! Image builder: walks a pulled image's layer chain and assembles the
//! artifact manifest.
//!
//! Per layer, in chain order: consult the layer cache; on a hit, reuse the
//! committed descriptor verbatim; on a miss, package the layer and commit
//! it. Any failure aborts the whole build — a partial manifest is never
//! produced.

use thiserror::Error;
use tracing::{debug, info};

use crate::convert::{ConvertError, LayerConverter};
use crate::layer::{LayerError, LayerStore};
use crate::manifest::ImageManifest;
use crate::source::PulledImage;

/// Errors from building an image manifest.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("layer cache error: {0}")]
    Layer(#[from] LayerError),

    #[error("layer conversion error: {0}")]
    Convert(#[from] ConvertError),
}

/// Builds an [`ImageManifest`] from a pulled image.
pub struct ImageBuilder<C> {
    store: LayerStore,
    converter: C,
}

impl<C: LayerConverter> ImageBuilder<C> {
    pub fn new(store: LayerStore, converter: C) -> Self {
        Self { store, converter }
    }

    /// The converter this builder packages cache misses with.
    pub fn converter(&self) -> &C {
        &self.converter
    }

    /// Build the manifest for a pulled image.
    ///
    /// Descriptor order in the result matches the source layer order.
    pub async fn build(&self, image: &PulledImage) -> Result<ImageManifest, BuildError> {
        let mut layers = Vec::with_capacity(image.layers.len());

        for pulled in &image.layers {
            let descriptor = match self.store.load(&pulled.id).await? {
                Some(descriptor) => {
                    debug!(layer = %pulled.id, "Reusing committed layer");
                    descriptor
                }
                None => {
                    let packaged = self.converter.convert(&pulled.id, &pulled.rootfs)?;
                    self.store.save(&pulled.id, &packaged).await?
                }
            };
            layers.push(descriptor);
        }

        info!(
            image = %image.name,
            id = %image.id,
            layer_count = layers.len(),
            "Image manifest assembled"
        );

        Ok(ImageManifest {
            layers,
            config: image.config.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::PackagedLayer;
    use crate::manifest::{ImageConfig, HASH_ALGORITHM};
    use crate::source::PulledLayer;
    use freight_blobstore::BlobClient;
    use std::collections::BTreeMap;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{method, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Converter that packages a layer as a fixed-content file and counts
    /// invocations.
    struct CountingConverter {
        dir: PathBuf,
        calls: AtomicUsize,
    }

    impl CountingConverter {
        fn new(dir: &Path) -> Self {
            Self {
                dir: dir.to_path_buf(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl LayerConverter for CountingConverter {
        fn convert(&self, layer_id: &str, _rootfs: &Path) -> Result<PackagedLayer, ConvertError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let contents = format!("packaged {layer_id}");
            let file = self.dir.join(format!("{}.squashfs", layer_id.replace(':', "_")));
            std::fs::write(&file, &contents)?;
            Ok(PackagedLayer {
                path: file,
                hashes: BTreeMap::from([(
                    HASH_ALGORITHM.to_string(),
                    freight_blobstore::sha512_hex(contents.as_bytes()),
                )]),
                size: contents.len() as u64,
            })
        }
    }

    fn pulled_image(tmp: &Path, layer_ids: &[&str]) -> PulledImage {
        let layers = layer_ids
            .iter()
            .map(|id| {
                let rootfs = tmp.join(id.replace(':', "_"));
                std::fs::create_dir_all(&rootfs).unwrap();
                PulledLayer {
                    id: id.to_string(),
                    rootfs,
                }
            })
            .collect();
        PulledImage {
            name: "library/demo".into(),
            id: "sha256:imagedigest".into(),
            layers,
            config: ImageConfig::default(),
        }
    }

    #[tokio::test]
    async fn test_cold_build_converts_and_commits_every_layer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let tmp = tempfile::TempDir::new().unwrap();
        let converter = CountingConverter::new(tmp.path());
        let store = LayerStore::new(BlobClient::new().unwrap(), server.uri());
        let builder = ImageBuilder::new(store, converter);

        let image = pulled_image(tmp.path(), &["sha256:l1", "sha256:l2", "sha256:l3"]);
        let manifest = builder.build(&image).await.unwrap();

        assert_eq!(manifest.layers.len(), 3);
        assert_eq!(manifest.layers[0].id, "sha256:l1");
        assert_eq!(manifest.layers[2].id, "sha256:l3");
        assert!(manifest.layers.iter().all(|l| !l.url.is_empty()));
        assert_eq!(builder.converter.calls.load(Ordering::SeqCst), 3);

        // 3 lookups, then per layer one blob PUT and one descriptor PUT.
        let puts = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| r.method.as_str() == "PUT")
            .count();
        assert_eq!(puts, 6);
    }

    #[tokio::test]
    async fn test_warm_build_skips_conversion() {
        let server = MockServer::start().await;
        // Every lookup hits: serve a committed descriptor for any layer.
        Mock::given(method("GET"))
            .and(path_regex(r"^/image-receive/layers/.*\.json$"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(
                serde_json::to_vec(&crate::manifest::LayerDescriptor {
                    id: "sha256:l1".into(),
                    url: "http://store/image-receive/layers/aa.squashfs".into(),
                    hashes: BTreeMap::from([(HASH_ALGORITHM.to_string(), "aa".to_string())]),
                    size: 3,
                })
                .unwrap(),
            ))
            .mount(&server)
            .await;

        let tmp = tempfile::TempDir::new().unwrap();
        let converter = CountingConverter::new(tmp.path());
        let store = LayerStore::new(BlobClient::new().unwrap(), server.uri());
        let builder = ImageBuilder::new(store, converter);

        let image = pulled_image(tmp.path(), &["sha256:l1"]);
        let manifest = builder.build(&image).await.unwrap();

        assert_eq!(manifest.layers.len(), 1);
        assert_eq!(builder.converter.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_build_aborts_on_store_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        // Blob PUT rejected.
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let tmp = tempfile::TempDir::new().unwrap();
        let converter = CountingConverter::new(tmp.path());
        let store = LayerStore::new(BlobClient::new().unwrap(), server.uri());
        let builder = ImageBuilder::new(store, converter);

        let image = pulled_image(tmp.path(), &["sha256:l1", "sha256:l2"]);
        let err = builder.build(&image).await.unwrap_err();
        assert!(matches!(err, BuildError::Layer(_)));

        // The build stopped at the first layer; the second was never looked up.
        let gets = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| r.method.as_str() == "GET")
            .count();
        assert_eq!(gets, 1);
    }
}
