use anyhow::{Context, Result};
use clap::Parser;
use facegate_core::{DistanceMetric, FaceGate, OnnxProvider};
use facegate_store::{FsImageStore, SqliteGallery};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod http;

use config::Config;

#[derive(Parser, Debug)]
#[command(name = "facegated", version, about = "Face registration and login service")]
struct Cli {
    /// TOML configuration file
    #[arg(long, env = "FACEGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, e.g. 0.0.0.0:5000
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Directory containing the ONNX models
    #[arg(long)]
    model_dir: Option<PathBuf>,

    /// SQLite gallery path
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Directory for registered photos
    #[arg(long)]
    faces_dir: Option<PathBuf>,

    /// Distance metric: cosine, euclidean or euclidean_l2
    #[arg(long)]
    metric: Option<DistanceMetric>,

    /// Same-identity distance threshold
    #[arg(long)]
    threshold: Option<f32>,
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        if let Some(dir) = &self.model_dir {
            config.model_dir = dir.clone();
        }
        if let Some(path) = &self.db_path {
            config.db_path = path.clone();
        }
        if let Some(dir) = &self.faces_dir {
            config.faces_dir = dir.clone();
        }
        if let Some(metric) = self.metric {
            config.metric = metric;
        }
        if self.threshold.is_some() {
            config.threshold = self.threshold;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref()).context("loading configuration")?;
    cli.apply(&mut config);
    config.validate()?;

    tracing::info!(
        bind = %config.bind,
        metric = %config.metric,
        threshold = config.effective_threshold(),
        db = %config.db_path.display(),
        faces = %config.faces_dir.display(),
        "facegated starting"
    );

    // Fail fast on missing models or unwritable storage.
    let provider = OnnxProvider::load(&config.provider_config()).context("loading face models")?;
    let gallery = SqliteGallery::open(&config.db_path).context("opening face gallery")?;
    let images = FsImageStore::open(&config.faces_dir).context("opening face image store")?;

    let gate = FaceGate::new(
        Box::new(provider),
        Box::new(gallery),
        Box::new(images),
        config.matcher_config(),
    );
    tracing::info!(gallery_size = gate.gallery_size()?, "face gallery loaded");

    let engine = engine::spawn_engine(gate, config.engine_queue_depth)?;
    let app = http::router(engine, config.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("binding {}", config.bind))?;
    tracing::info!(addr = %config.bind, "facegated ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("facegated shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
