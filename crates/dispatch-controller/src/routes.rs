//! HTTP routes for the dispatch controller.
//!
//! Defines the Axum router and application state.

use crate::actors::DispatchActorHandle;
use crate::config::Config;
use crate::handlers;
use crate::history::HistoryStore;
use crate::transport;
use axum::{routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across all handlers.
pub struct AppState {
    /// Service configuration.
    pub config: Config,

    /// Handle to the dispatch actor tree.
    pub dispatch: DispatchActorHandle,

    /// Transmission history store (read API).
    pub history: Arc<HistoryStore>,
}

/// Build the application routes.
///
/// - `/v1/ws` - WebSocket endpoint (control + audio)
/// - `/v1/health` - liveness probe
/// - `/v1/channels/{channel_id}/transmissions` - history range query
/// - `/v1/transmissions/{transmission_id}` - single record for playback
/// - `/v1/alerts`, `/v1/alerts/{alert_id}` - alert log
///
/// The request timeout applies to the HTTP handlers; the WebSocket
/// upgrade escapes it once established.
pub fn build_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/ws", get(transport::ws_handler))
        .route("/v1/health", get(handlers::health_check))
        .route(
            "/v1/channels/:channel_id/transmissions",
            get(handlers::list_transmissions),
        )
        .route(
            "/v1/transmissions/:transmission_id",
            get(handlers::get_transmission),
        )
        .route("/v1/alerts", get(handlers::list_alerts))
        .route("/v1/alerts/:alert_id", get(handlers::get_alert))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
}

/// Build the operational metrics route, kept off the versioned API.
pub fn build_metrics_routes(handle: PrometheusHandle) -> Router {
    Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(handle)
}
