//! # roomhub
//!
//! Real-time chat room server.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! roomhub
//!
//! # Run with a specific config file
//! roomhub --config /path/to/roomhub.toml
//!
//! # Run with environment variables
//! ROOMHUB_PORT=8080 ROOMHUB_HOST=0.0.0.0 roomhub
//! ```

use anyhow::Result;
use clap::Parser;
use roomhub_server::{config::Config, handlers, metrics};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "roomhub")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file; `ROOMHUB_*` environment variables still apply on top
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "roomhub=debug,roomhub_core=debug,roomhub_server=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = match &cli.config {
        Some(path) => Config::layered(Some(path.as_path()))?,
        None => Config::load()?,
    };

    tracing::info!("Starting roomhub on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
