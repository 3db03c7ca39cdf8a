//! Tier Sweeper Binary
//!
//! Keeps a Water store tidy by deleting expired nodes and edges on a fixed
//! period, with:
//! - Structured JSON logging
//! - Graceful shutdown on Ctrl+C / SIGTERM
//!
//! ## Configuration
//!
//! Environment variables:
//! - `WATER_BACKEND`: `memory`, `sqlite` or `postgres` (default: memory)
//! - `WATER_SWEEP_INTERVAL_SECS`: sweep period (default: 60)
//! - `SQLITE_URL` / `DATABASE_URL`: backend connection strings
//! - `RUST_LOG`: Log level filter (default: info)
//! - `LOG_FORMAT`: "json" for structured logs, "pretty" for development (default: json)
//!
//! ## Usage
//!
//! ```bash
//! WATER_BACKEND=sqlite SQLITE_URL=sqlite://data/tiers.db cargo run --bin tier_sweeper
//! ```

use std::time::{Duration, Instant};

use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tiered_graph_store::{open_water_store, spawn_sweeper, StoreConfig};

/// Initialize the tracing subscriber with JSON or pretty format
fn init_tracing() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "tier_sweeper=info,tiered_graph_store=info,sqlx=warn".into());

    if log_format == "pretty" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(true)
                    .flatten_event(true),
            )
            .init();
    }
}

/// Resolves on Ctrl+C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown"),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown"),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let version = env!("CARGO_PKG_VERSION");
    let build_sha = option_env!("BUILD_SHA").unwrap_or("dev");
    info!(version = version, build_sha = build_sha, "Starting Tier Sweeper");

    let config = StoreConfig::from_env();

    let connect_start = Instant::now();
    let store = match tokio::time::timeout(Duration::from_secs(30), open_water_store(&config)).await {
        Ok(Ok(store)) => store,
        Ok(Err(e)) => {
            tracing::error!(error = %e, backend = %config.water_backend, "Failed to open water store");
            return Err(e.into());
        }
        Err(_) => {
            tracing::error!(backend = %config.water_backend, "Water store connection timeout after 30s");
            return Err("Water store connection timeout".into());
        }
    };

    if let Err(e) = store.initialize().await {
        tracing::error!(error = %e, "Failed to initialize water schema");
        return Err(e.into());
    }

    info!(
        backend = store.backend(),
        latency_ms = connect_start.elapsed().as_millis() as u64,
        "Water store ready"
    );

    let initial = store.sweep().await?;
    info!(nodes = initial.nodes, edges = initial.edges, "Initial sweep complete");

    let sweeper = spawn_sweeper(store, config.sweep_interval);
    shutdown_signal().await;

    let passes = sweeper.shutdown().await;
    info!(passes, "Tier Sweeper shutdown complete");

    Ok(())
}
