//! fxstream - streaming price client entry point.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

/// Authenticated streaming price client
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via FXSTREAM_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,

    /// Log every price level at info
    #[arg(long)]
    log_price_updates: bool,

    /// Write the Prometheus text exposition here on shutdown
    #[arg(long)]
    metrics_out: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize TLS crypto provider (must be before any WS connections)
    fxstream_ws::init_crypto();

    let args = Args::parse();

    fxstream_telemetry::init_logging()?;

    info!("Starting fxstream v{}", env!("CARGO_PKG_VERSION"));

    // CLI arg > FXSTREAM_CONFIG env var > default
    let config_path = args
        .config
        .or_else(|| std::env::var("FXSTREAM_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    info!(config_path = %config_path, "Loading configuration");

    let config = fxstream_app::AppConfig::from_file(&config_path)?;
    info!(
        url = %config.stream.url(),
        subscriptions = config.subscriptions.len(),
        "Configuration loaded"
    );

    let credentials = config.credentials.load()?;

    let mut app = fxstream_app::Application::new(config, credentials)
        .log_price_updates(args.log_price_updates);
    let result = app.run().await;

    if let Some(path) = args.metrics_out {
        let text = fxstream_telemetry::Metrics::render()?;
        std::fs::write(&path, text)
            .with_context(|| format!("Failed to write metrics to {}", path.display()))?;
        info!(path = %path.display(), "Metrics written");
    }

    result?;
    Ok(())
}
