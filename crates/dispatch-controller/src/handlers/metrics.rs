//! Prometheus metrics endpoint handler.
//!
//! Unauthenticated so Prometheus can scrape. Only operational data with
//! bounded cardinality labels is exposed; no identities beyond channel ids.

use axum::{extract::State, response::IntoResponse};
use metrics_exporter_prometheus::PrometheusHandle;

/// Handler for `GET /metrics`.
///
/// Returns Prometheus text format. Operational endpoint, not versioned.
#[tracing::instrument(skip_all, name = "dc.metrics.scrape")]
pub async fn metrics_handler(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    handle.render()
}
