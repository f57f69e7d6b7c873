//! Mailbox command and outbound event types.
//!
//! Every cross-component signal is a tagged variant dispatched to the
//! owning actor; there is no shared mutable state and no untyped
//! broadcast.

use crate::alerts::EmergencyAlert;
use crate::errors::DcError;
use dispatch_protocol::frame::AudioFrame;
use dispatch_protocol::messages::ServerMessage;
use dispatch_protocol::types::{ReleaseReason, TransmissionToken};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// An event queued for delivery to one client connection.
///
/// Control messages serialize as JSON text frames; audio stays binary.
#[derive(Debug, Clone)]
pub enum Outbound {
    Control(ServerMessage),
    Audio(AudioFrame),
}

/// Per-session outbound queue. Fan-out uses `try_send` so one slow
/// listener never blocks delivery to the rest.
pub type OutboundSender = mpsc::Sender<Outbound>;

/// Commands handled by a `ChannelActor`.
#[derive(Debug)]
pub enum ChannelCommand {
    /// Subscribe a session. Idempotent: a re-join refreshes the outbound
    /// handle without duplicating the membership entry.
    Join {
        session_id: String,
        user_id: String,
        outbound: OutboundSender,
        respond_to: oneshot::Sender<()>,
    },
    /// Unsubscribe a session, releasing its token first if it holds one.
    Leave {
        session_id: String,
        respond_to: oneshot::Sender<()>,
    },
    /// Membership in insertion order.
    Members {
        respond_to: oneshot::Sender<Vec<String>>,
    },
    /// Session id of the current transmitter, if any.
    ActiveTransmitter {
        respond_to: oneshot::Sender<Option<String>>,
    },
    /// Atomic grant-or-busy. Never waits.
    RequestTransmission {
        session_id: String,
        respond_to: oneshot::Sender<Result<TransmissionToken, DcError>>,
    },
    /// Relay one audio frame from `session_id`. Stale tokens and frames
    /// from sessions other than the token holder are logged and dropped.
    RelayFrame {
        session_id: String,
        frame: AudioFrame,
    },
    /// Release a token. Idempotent: a non-current token id is a no-op.
    Release {
        token_id: Uuid,
        reason: ReleaseReason,
        respond_to: oneshot::Sender<()>,
    },
    /// Release iff the given session currently holds the token.
    ReleaseFor {
        session_id: String,
        reason: ReleaseReason,
    },
    /// Deliver a channel-scoped event to every member, stamped with the
    /// per-channel sequence.
    Broadcast { event: ChannelEvent },
}

/// Channel-scoped broadcast events. The owning actor stamps each with
/// the next per-channel sequence number before fan-out, so listeners
/// observe alerts, transcription updates, and transmissions in one
/// total order.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    AlertRaised { alert: EmergencyAlert },
    AlertAcknowledged { alert: EmergencyAlert },
    AlertResolved { alert: EmergencyAlert },
    TranscriptionUpdate {
        transmission_id: Uuid,
        text: String,
        confidence: f32,
    },
}
