//! Observability: Prometheus metrics definitions and the recorder setup.

pub mod metrics;

pub use metrics::{
    init_metrics_recorder, record_alert_event, record_frame_dropped, record_frame_relayed,
    record_grant_decision, record_release, record_transcription, set_channel_members,
    set_sessions_active,
};
