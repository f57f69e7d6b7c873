//! JSON control message catalog.
//!
//! Control traffic is `type`-tagged JSON in both directions; audio rides
//! separately as binary frames (see [`crate::frame`]). Channel-scoped
//! broadcasts carry the per-channel `sequence` so listeners observe a
//! single total order across control events and audio frames, even after
//! a reconnect.

use crate::types::{AlertType, ReconnectPolicy, ReleaseReason, TransmissionToken};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Messages a client sends to the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Subscribe to a channel. Idempotent.
    JoinChannel { channel_id: String },
    /// Unsubscribe from a channel.
    LeaveChannel { channel_id: String },
    /// Request exclusive transmission rights.
    PttStart { channel_id: String },
    /// Release transmission rights explicitly.
    PttStop { token_id: Uuid },
    /// Raise an emergency alert, channel-scoped or global.
    EmergencyRaise {
        channel_id: Option<String>,
        alert_type: AlertType,
        description: String,
    },
    /// Acknowledge an active alert.
    EmergencyAcknowledge { alert_id: Uuid },
    /// Resolve an acknowledged alert.
    EmergencyResolve { alert_id: Uuid, notes: String },
    /// Liveness ping; answered immediately with `heartbeat-pong`.
    HeartbeatPing,
}

/// Messages the coordinator sends to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Handshake acknowledgment, including the reconnect schedule.
    SessionReady {
        session_id: String,
        user_id: String,
        /// True when a prior session was resumed within the grace window.
        resumed: bool,
        reconnect: ReconnectPolicy,
    },
    /// This connection was displaced by a newer one for the same identity.
    SessionReplaced { reason: String },
    /// Join acknowledged (also returned for a re-join).
    JoinOk { channel_id: String },
    /// Leave acknowledged.
    LeaveOk { channel_id: String },
    /// PTT granted; the token accompanies every audio frame.
    PttGranted { token: TransmissionToken },
    /// PTT denied because the channel is busy.
    PttDenied {
        channel_id: String,
        current_holder: Option<String>,
    },
    /// Broadcast: someone started transmitting on a channel.
    TransmissionStarted {
        channel_id: String,
        user_id: String,
        sequence: u64,
    },
    /// Broadcast: a transmission ended. Emitted exactly once per token.
    TransmissionEnded {
        channel_id: String,
        user_id: String,
        transmission_id: Uuid,
        duration_ms: u64,
        reason: ReleaseReason,
        sequence: u64,
    },
    /// Broadcast: transcription attached to a finished transmission.
    TranscriptionUpdate {
        transmission_id: Uuid,
        channel_id: String,
        text: String,
        confidence: f32,
        sequence: u64,
    },
    /// Broadcast: an alert was raised. `sequence` is absent for global alerts.
    AlertRaised {
        alert_id: Uuid,
        channel_id: Option<String>,
        alert_type: AlertType,
        raised_by: String,
        description: String,
        raised_at: DateTime<Utc>,
        #[serde(skip_serializing_if = "Option::is_none")]
        sequence: Option<u64>,
    },
    /// Broadcast: an alert was acknowledged.
    AlertAcknowledged {
        alert_id: Uuid,
        acknowledged_by: String,
        acknowledged_at: DateTime<Utc>,
        #[serde(skip_serializing_if = "Option::is_none")]
        sequence: Option<u64>,
    },
    /// Broadcast: an alert was resolved.
    AlertResolved {
        alert_id: Uuid,
        resolved_by: String,
        notes: String,
        resolved_at: DateTime<Utc>,
        #[serde(skip_serializing_if = "Option::is_none")]
        sequence: Option<u64>,
    },
    /// Liveness reply.
    HeartbeatPong,
    /// Typed error local to the requesting session.
    Error { code: i32, message: String },
}
