//! Metrics definitions for the dispatch controller.
//!
//! Naming follows Prometheus conventions: `dc_` prefix, `_total` suffix
//! for counters, `_seconds` suffix for duration histograms.
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `channel_id`: bounded by the configured channel catalog
//! - `result`: granted | busy | complete | failed
//! - `reason`: bounded by the release-reason enum (4 values)
//! - `event`: raised | acknowledged | resolved

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the Prometheus recorder and return the handle used by the
/// metrics endpoint.
///
/// Must be called once, before any metric is recorded. Bucket layout is
/// tuned for PTT latencies: grant decisions are sub-millisecond in the
/// common case, transmission durations run seconds.
///
/// # Errors
///
/// Returns an error if a recorder is already installed.
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("dc_grant".to_string()),
            &[0.0001, 0.0005, 0.001, 0.005, 0.010, 0.050, 0.100],
        )
        .map_err(|e| format!("Failed to set grant latency buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("dc_transmission_duration".to_string()),
            &[0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0],
        )
        .map_err(|e| format!("Failed to set transmission duration buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

/// Set the number of registered sessions (connected or in grace).
///
/// Metric: `dc_sessions_active`
pub fn set_sessions_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("dc_sessions_active").set(count as f64);
}

/// Set the membership size of one channel.
///
/// Metric: `dc_channel_members`
/// Labels: `channel_id`
pub fn set_channel_members(channel_id: &str, count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("dc_channel_members", "channel_id" => channel_id.to_string()).set(count as f64);
}

/// Count a grant decision and record its latency.
///
/// Metric: `dc_grant_decisions_total`, `dc_grant_decision_seconds`
/// Labels: `channel_id`, `result` (granted | busy)
pub fn record_grant_decision(channel_id: &str, result: &str, duration: Duration) {
    counter!("dc_grant_decisions_total",
        "channel_id" => channel_id.to_string(),
        "result" => result.to_string())
    .increment(1);
    histogram!("dc_grant_decision_seconds", "channel_id" => channel_id.to_string())
        .record(duration.as_secs_f64());
}

/// Count a token release and record the transmission duration.
///
/// Metric: `dc_releases_total`, `dc_transmission_duration_seconds`
/// Labels: `channel_id`, `reason`
pub fn record_release(channel_id: &str, reason: &str, duration: Duration) {
    counter!("dc_releases_total",
        "channel_id" => channel_id.to_string(),
        "reason" => reason.to_string())
    .increment(1);
    histogram!("dc_transmission_duration_seconds", "channel_id" => channel_id.to_string())
        .record(duration.as_secs_f64());
}

/// Count one relayed audio frame.
///
/// Metric: `dc_frames_relayed_total`
/// Labels: `channel_id`
pub fn record_frame_relayed(channel_id: &str) {
    counter!("dc_frames_relayed_total", "channel_id" => channel_id.to_string()).increment(1);
}

/// Count a frame dropped before fan-out (stale token, no transmitter).
///
/// Metric: `dc_frames_dropped_total`
/// Labels: `channel_id`, `reason`
pub fn record_frame_dropped(channel_id: &str, reason: &str) {
    counter!("dc_frames_dropped_total",
        "channel_id" => channel_id.to_string(),
        "reason" => reason.to_string())
    .increment(1);
}

/// Count a transcription outcome.
///
/// Metric: `dc_transcriptions_total`
/// Labels: `result` (complete | failed)
pub fn record_transcription(result: &str) {
    counter!("dc_transcriptions_total", "result" => result.to_string()).increment(1);
}

/// Count an emergency alert lifecycle event.
///
/// Metric: `dc_alert_events_total`
/// Labels: `event` (raised | acknowledged | resolved)
pub fn record_alert_event(event: &str) {
    counter!("dc_alert_events_total", "event" => event.to_string()).increment(1);
}
