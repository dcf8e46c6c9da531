//! freight-receive
//!
//! Pulls a container image and publishes it as a freight artifact: each
//! layer is packaged into a squashfs image and committed to the blob store
//! content-addressed, then the assembled manifest is uploaded and the
//! artifact record registered with the control plane.

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use freight_blobstore::BlobClient;
use freight_receive::builder::ImageBuilder;
use freight_receive::config::Config;
use freight_receive::controller::ControllerClient;
use freight_receive::convert::{SquashfsConfig, SquashfsConverter};
use freight_receive::layer::LayerStore;
use freight_receive::publisher::Publisher;
use freight_receive::source::{ImageSource, RegistryConfig, RegistrySource};

#[derive(Parser)]
#[command(name = "freight-receive", about = "Publish a container image as a freight artifact")]
struct Cli {
    /// Image reference to receive (e.g. alpine:3.20 or ghcr.io/org/app@sha256:...)
    image: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(&cli.image).await {
        error!(error = %e, "Receive failed");
        std::process::exit(1);
    }

    Ok(())
}

async fn run(reference: &str) -> Result<()> {
    let config = Config::from_env()?;
    info!(
        image = %reference,
        blobstore_url = %config.blobstore_url,
        controller_url = %config.controller_url,
        "Configuration loaded"
    );

    let source = RegistrySource::new(RegistryConfig {
        default_registry: config.registry.clone(),
        unpack_dir: config.data_dir.join("unpacked"),
    })?;
    let image = source.pull(reference).await?;

    let blobs = BlobClient::new()?;
    let converter = SquashfsConverter::new(SquashfsConfig {
        output_dir: config.data_dir.join("squashfs"),
    });
    let store = LayerStore::new(blobs.clone(), &config.blobstore_url);
    let builder = ImageBuilder::new(store, converter);
    let manifest = builder.build(&image).await?;

    let controller = ControllerClient::new(&config.controller_url, &config.controller_key)?;
    let publisher = Publisher::new(blobs, controller, &config.blobstore_url);
    let artifact = publisher.publish(&image.name, &image.id, manifest).await?;

    info!(uri = %artifact.uri, "Image received");
    Ok(())
}
