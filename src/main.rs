//! Draftscan - OCR extraction service
//!
//! An HTTP service that accepts an uploaded image, optionally crops and
//! rotates it, and returns text extracted by a PaddleOCR model together with
//! per-line bounding boxes and confidence scores.

mod config;
mod error;
mod server;
mod vision;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;
use crate::server::AppState;
use crate::vision::{
    default_models_dir, ModelManager, OcrPipeline, PaddleOcrEngine, RecognitionEngine,
    RotationPolicy,
};

/// Draftscan - OCR extraction service
#[derive(Parser, Debug)]
#[command(name = "draftscan")]
#[command(about = "OCR extraction service for uploaded drawings and document scans")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured bind host
    #[arg(long)]
    host: Option<String>,

    /// Override the configured bind port
    #[arg(long)]
    port: Option<u16>,

    /// Write the effective configuration to the given path and exit
    #[arg(long, value_name = "PATH")]
    write_config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = load_configuration(args.config.as_deref())?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    if let Some(path) = args.write_config {
        config::save_config(&config, &path)
            .with_context(|| format!("failed to write configuration to {path:?}"))?;
        info!("Wrote configuration to {:?}", path);
        return Ok(());
    }

    info!("Draftscan OCR server starting...");
    info!("OCR languages: {:?}", config.ocr.languages);
    info!("GPU requested: {}", config.ocr.use_gpu);

    // Prepare models and construct the engine before binding the socket;
    // the service must not accept traffic without a working engine.
    let models_dir = match &config.ocr.models_dir {
        Some(dir) => dir.clone(),
        None => default_models_dir()?,
    };
    let manager = ModelManager::with_dir(models_dir)?;
    info!("Model cache: {:?}", manager.models_dir());
    let model_set = manager
        .ensure_models(&config.ocr.languages)
        .await
        .context("failed to prepare OCR models")?;

    let engine = PaddleOcrEngine::load(
        &model_set,
        config.ocr.languages.clone(),
        config.ocr.use_gpu,
    )
    .context("failed to initialize recognition engine")?;
    info!(
        "Recognition engine ready (accelerated: {})",
        engine.accelerated()
    );

    let rotation_policy = if config.ocr.strict_rotation {
        RotationPolicy::Strict
    } else {
        RotationPolicy::Permissive
    };

    let pipeline = Arc::new(OcrPipeline::new(Arc::new(engine), rotation_policy));
    let app = server::router(AppState::new(pipeline));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Load configuration from an explicit path, or fall back to defaults.
/// A config file that was asked for but cannot be read or parsed is fatal.
fn load_configuration(path: Option<&Path>) -> Result<AppConfig> {
    match path {
        Some(path) => {
            let config = config::load_config(path)
                .with_context(|| format!("failed to load configuration from {path:?}"))?;
            info!("Loaded configuration from {:?}", path);
            Ok(config)
        }
        None => {
            info!("Using default configuration");
            Ok(AppConfig::default())
        }
    }
}
