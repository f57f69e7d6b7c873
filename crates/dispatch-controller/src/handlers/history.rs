//! Read API over the transmission history store.
//!
//! Serves dispatch consoles and audit tooling. Everything here is a
//! read-only view over the append-only log; the live PTT path never
//! waits on these handlers.

use crate::alerts::EmergencyAlert;
use crate::errors::DcError;
use crate::history::Transmission;
use crate::routes::AppState;
use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use dispatch_protocol::types::AlertStatus;
use serde::Deserialize;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// Query parameters for `GET /v1/channels/{channel_id}/transmissions`.
#[derive(Debug, Deserialize)]
pub struct TimeRangeQuery {
    /// Inclusive lower bound on start time (RFC 3339).
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on start time (RFC 3339).
    pub to: Option<DateTime<Utc>>,
}

/// Query parameters for `GET /v1/alerts`.
#[derive(Debug, Deserialize)]
pub struct AlertFilterQuery {
    pub channel_id: Option<String>,
    pub status: Option<AlertStatus>,
}

/// Handler for `GET /v1/channels/{channel_id}/transmissions`.
///
/// Lists transmissions on one catalog channel within an optional time
/// range, in start order. An unknown channel is a 404, not an empty list.
#[instrument(skip_all, name = "dc.history.list_transmissions", fields(channel_id = %channel_id))]
pub async fn list_transmissions(
    State(state): State<Arc<AppState>>,
    Path(channel_id): Path<String>,
    Query(range): Query<TimeRangeQuery>,
) -> Result<Json<Vec<Transmission>>, DcError> {
    if !state.config.channels.iter().any(|c| c.id == channel_id) {
        return Err(DcError::ChannelNotFound(channel_id));
    }

    let transmissions = state
        .history
        .list_transmissions(&channel_id, range.from, range.to)
        .await;
    Ok(Json(transmissions))
}

/// Handler for `GET /v1/transmissions/{transmission_id}`.
#[instrument(skip_all, name = "dc.history.get_transmission")]
pub async fn get_transmission(
    State(state): State<Arc<AppState>>,
    Path(transmission_id): Path<Uuid>,
) -> Result<Json<Transmission>, DcError> {
    state
        .history
        .get_transmission(transmission_id)
        .await
        .map(Json)
        .ok_or_else(|| DcError::TransmissionNotFound(transmission_id.to_string()))
}

/// Handler for `GET /v1/alerts`.
///
/// Lists alerts in raise order, optionally filtered by channel and status.
#[instrument(skip_all, name = "dc.history.list_alerts")]
pub async fn list_alerts(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<AlertFilterQuery>,
) -> Json<Vec<EmergencyAlert>> {
    let alerts = state
        .history
        .list_alerts(filter.channel_id.as_deref(), filter.status)
        .await;
    Json(alerts)
}

/// Handler for `GET /v1/alerts/{alert_id}`.
#[instrument(skip_all, name = "dc.history.get_alert")]
pub async fn get_alert(
    State(state): State<Arc<AppState>>,
    Path(alert_id): Path<Uuid>,
) -> Result<Json<EmergencyAlert>, DcError> {
    state
        .history
        .get_alert(alert_id)
        .await
        .map(Json)
        .ok_or_else(|| DcError::AlertNotFound(alert_id.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_time_range_query_parses_rfc3339() {
        let query: TimeRangeQuery =
            serde_urlencoded::from_str("from=2026-08-01T00:00:00Z&to=2026-08-02T00:00:00Z")
                .unwrap();
        assert!(query.from.is_some());
        assert!(query.to.unwrap() > query.from.unwrap());
    }

    #[test]
    fn test_alert_filter_parses_kebab_status() {
        let query: AlertFilterQuery =
            serde_urlencoded::from_str("channel_id=ops-1&status=acknowledged").unwrap();
        assert_eq!(query.channel_id.as_deref(), Some("ops-1"));
        assert_eq!(query.status, Some(AlertStatus::Acknowledged));
    }

    #[test]
    fn test_empty_query_is_unfiltered() {
        let query: AlertFilterQuery = serde_urlencoded::from_str("").unwrap();
        assert!(query.channel_id.is_none());
        assert!(query.status.is_none());
    }
}
