//! Paddle Match Server - authoritative two-player paddle match server
//!
//! This is the main entry point for the server. It handles:
//! - WebSocket connections for real-time play
//! - HTTP endpoints for health and match creation
//! - Fan-out of match events to the log

mod app;
mod config;
mod game;
mod http;
mod util;
mod ws;

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::app::AppState;
use crate::config::Config;
use crate::game::MatchEvent;
use crate::http::build_router;
use crate::util::time::init_server_time;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log_level);

    // Initialize server time tracking
    init_server_time();

    info!("Starting Paddle Match Server");
    info!("Server address: {}", config.server_addr);

    // Create application state
    let state = AppState::new(config.clone());

    // Spawn match event consumer
    tokio::spawn(log_match_events(state.events.subscribe()));

    // Build router
    let router = build_router(state);

    // Start server
    let addr: SocketAddr = config.server_addr;
    let listener = TcpListener::bind(addr).await?;

    info!("Server listening on {}", addr);
    info!("Health check: http://{}/health", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Log every match event until the channel closes
async fn log_match_events(mut rx: broadcast::Receiver<MatchEvent>) {
    loop {
        match rx.recv().await {
            Ok(MatchEvent::ScoreUpdated {
                match_id,
                score1,
                score2,
                ..
            }) => {
                info!(match_id = %match_id, score1, score2, "Score updated");
            }
            Ok(event @ MatchEvent::MatchFinished { .. }) => match serde_json::to_string(&event) {
                Ok(json) => info!(event = %json, "Match finished"),
                Err(e) => warn!(error = %e, "Failed to serialize match event"),
            },
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "Match event consumer lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }
}
