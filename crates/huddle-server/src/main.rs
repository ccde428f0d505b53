//! # Huddle Server
//!
//! Chat presence and room broadcast server.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! huddle
//!
//! # Run with a specific config file
//! huddle --config /path/to/huddle.toml
//!
//! # Run with environment variables
//! HUDDLE_PORT=8080 HUDDLE_HOST=0.0.0.0 HUDDLE__DATABASE__URL=sqlite://chat.db huddle
//! ```

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tenvis_huddle_server::{metrics, run_server, AppState, Config, SqliteStore};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "tenvis_huddle_server=debug,tenvis_huddle_core=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let mut args = std::env::args().skip(1);
    let config = match (args.next().as_deref(), args.next()) {
        (Some("--config"), Some(path)) => Config::from_file(path)?,
        _ => Config::load()?,
    };

    let addr = config.bind_addr()?;
    tracing::info!("Starting Huddle server on {}", addr);

    let store = SqliteStore::connect(&config.database)
        .await
        .context("Failed to open database")?;
    let state = Arc::new(AppState::new(config.clone(), store));

    // Initialize metrics
    if config.metrics.enabled {
        metrics::init_metrics();
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            tracing::error!("Failed to start metrics server: {}", e);
        }
        metrics::spawn_hub_reporter(Arc::clone(&state.hub), Duration::from_secs(5));
    }

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    run_server(state, listener).await
}
