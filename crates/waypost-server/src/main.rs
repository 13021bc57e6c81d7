//! # waypost
//!
//! Live player position relay.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings (127.0.0.1:8080, POST /collect)
//! waypost
//!
//! # Run with a config file in the working directory
//! cp waypost.example.toml waypost.toml && waypost
//!
//! # Run with environment variables
//! WAYPOST_PORT=8080 WAYPOST_HOST=0.0.0.0 waypost
//! ```

use anyhow::Result;
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use waypost_server::{config, handlers, metrics};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "waypost=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match config::Config::load() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {:#}", e);
            return Err(e);
        }
    };

    tracing::info!("Starting waypost on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    if let Err(e) = handlers::run_server(config).await {
        error!("Server failed: {:#}", e);
        return Err(e);
    }

    Ok(())
}
