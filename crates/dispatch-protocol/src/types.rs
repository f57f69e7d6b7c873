//! Shared vocabulary types used on both sides of the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of a dispatch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChannelKind {
    /// Ordinary talk group.
    Standard,
    /// Emergency traffic channel.
    Emergency,
    /// Dispatch-priority channel.
    DispatchPriority,
}

/// Why a transmission token was released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReleaseReason {
    /// The holder sent an explicit stop.
    ExplicitStop,
    /// The holder's session closed or its reconnect grace expired.
    Disconnect,
    /// The idle sweep reclaimed an abandoned press.
    IdleTimeout,
    /// Reserved: a priority policy preempted ordinary traffic.
    ForcedByEmergency,
}

/// Category of an emergency alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlertType {
    OfficerDown,
    Medical,
    BackupRequest,
}

/// Lifecycle state of an emergency alert. Transitions are strictly forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Resolved,
}

/// Transcription state of a finished transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TranscriptionStatus {
    /// Transmission still in progress; nothing submitted yet.
    None,
    /// Submitted to the transcription service, awaiting a result.
    Pending,
    /// Text and confidence attached.
    Complete,
    /// The service failed; the record stays playable without text.
    Failed,
}

/// Capability object for exclusive transmission rights on a channel.
///
/// The `token_id` doubles as the id of the transmission history record.
/// `sequence` increases monotonically per channel across token grants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransmissionToken {
    pub token_id: Uuid,
    pub channel_id: String,
    pub holder: String,
    pub sequence: u64,
    pub issued_at: DateTime<Utc>,
}

/// Reconnect schedule advertised to clients in `session-ready`.
///
/// Clients retry with `base_ms * factor^attempt` capped at `cap_ms`, plus
/// jitter; the server keeps the session resumable for `grace_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    pub base_ms: u64,
    pub factor: u32,
    pub cap_ms: u64,
    pub grace_ms: u64,
}
