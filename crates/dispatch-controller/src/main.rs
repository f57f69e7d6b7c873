//! Dispatch Controller
//!
//! Stateful WebSocket server for push-to-talk dispatch coordination.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Create the history store and transcription worker
//! 4. Spawn the dispatch actor tree (one channel actor per catalog entry)
//! 5. Start the HTTP/WebSocket server
//! 6. Wait for shutdown signal, then cancel the actor tree

#![warn(clippy::pedantic)]

use std::sync::Arc;

use dispatch_controller::actors::DispatchActor;
use dispatch_controller::config::Config;
use dispatch_controller::history::HistoryStore;
use dispatch_controller::observability;
use dispatch_controller::routes::{build_metrics_routes, build_routes, AppState};
use dispatch_controller::transcription::{OfflineTranscriber, TranscriptionAdapter};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dispatch_controller=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Dispatch Controller");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        dc_id = %config.dc_id,
        bind_address = %config.bind_address,
        channels = config.channels.len(),
        idle_timeout_seconds = config.idle_timeout_seconds,
        reconnect_grace_seconds = config.reconnect_grace_seconds,
        "Configuration loaded successfully"
    );

    // Must happen before any metrics are recorded
    let prometheus_handle = observability::init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        anyhow::anyhow!(e)
    })?;

    let cancel_token = CancellationToken::new();

    let history = Arc::new(HistoryStore::new());
    let transcription = TranscriptionAdapter::spawn(
        OfflineTranscriber,
        Arc::clone(&history),
        cancel_token.child_token(),
    );

    let (dispatch, dispatch_task) = DispatchActor::spawn(
        &config,
        Arc::clone(&history),
        transcription,
        cancel_token.child_token(),
    );
    info!(channels = config.channels.len(), "Actor tree started");

    let bind_address = config.bind_address.clone();
    let state = Arc::new(AppState {
        config,
        dispatch,
        history,
    });
    let app = build_routes(state).merge(build_metrics_routes(prometheus_handle));

    let listener = tokio::net::TcpListener::bind(&bind_address).await.map_err(|e| {
        error!(error = %e, bind_address = %bind_address, "Failed to bind server address");
        e
    })?;
    info!(bind_address = %bind_address, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel_token.clone()))
        .await?;

    // Stop the actor tree after the server drains
    cancel_token.cancel();
    if let Err(e) = dispatch_task.await {
        error!(error = %e, "Dispatch actor terminated abnormally");
    }

    info!("Dispatch Controller stopped");
    Ok(())
}

/// Resolve on SIGINT/SIGTERM and begin cancellation.
async fn shutdown_signal(cancel_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!(error = %e, "Failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
    cancel_token.cancel();
}
