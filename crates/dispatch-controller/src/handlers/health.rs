//! Health check handler.

use crate::routes::AppState;
use axum::extract::State;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;

/// Response body for `GET /v1/health`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub dc_id: String,
    pub sessions: usize,
    pub channels: usize,
}

/// Health check handler.
///
/// Pings the dispatch actor to verify the actor tree is responsive.
/// Returns `unhealthy` with zeroed counters rather than an error status,
/// so orchestration probes always see a response body.
#[instrument(skip_all, name = "dc.health.check")]
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let response = match state.dispatch.stats().await {
        Ok(stats) => HealthResponse {
            status: "healthy".to_string(),
            dc_id: state.config.dc_id.clone(),
            sessions: stats.sessions,
            channels: stats.channels,
        },
        Err(_) => HealthResponse {
            status: "unhealthy".to_string(),
            dc_id: state.config.dc_id.clone(),
            sessions: 0,
            channels: 0,
        },
    };

    Json(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_response_structure() {
        let response = HealthResponse {
            status: "healthy".to_string(),
            dc_id: "dc-test-001".to_string(),
            sessions: 3,
            channels: 4,
        };

        assert_eq!(response.status, "healthy");
        assert_eq!(response.channels, 4);
    }
}
