//! `ChannelActor` - per-channel actor that owns all channel state.
//!
//! Each `ChannelActor`:
//! - Owns the membership roster for one channel
//! - Arbitrates transmission tokens (atomic grant-or-busy, no queueing)
//! - Relays audio frames from the token holder to every other member
//! - Stamps the per-channel sequence on frames and control broadcasts,
//!   so members observe one total order per channel
//! - Reclaims abandoned tokens with the idle sweep
//!
//! The mailbox is the mutual-exclusion point: a grant decision and a
//! competing request serialize through it, so two sessions can never
//! hold the token at once.

use crate::errors::DcError;
use crate::history::{HistoryStore, Transmission};
use crate::observability;
use crate::transcription::{TranscriptionHandle, TranscriptionJob};

use super::messages::{ChannelCommand, ChannelEvent, Outbound, OutboundSender};

use chrono::Utc;
use dispatch_protocol::frame::AudioFrame;
use dispatch_protocol::messages::ServerMessage;
use dispatch_protocol::types::{ChannelKind, ReleaseReason, TransmissionToken};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Mailbox buffer. Audio frames share the mailbox with control commands;
/// sized for a full channel transmitting at 50 frames/s.
const CHANNEL_MAILBOX_BUFFER: usize = 512;

/// Idle sweep resolution.
const IDLE_TICK: Duration = Duration::from_secs(1);

/// Handle to a `ChannelActor`.
#[derive(Clone)]
pub struct ChannelActorHandle {
    sender: mpsc::Sender<ChannelCommand>,
    channel_id: String,
    kind: ChannelKind,
}

impl ChannelActorHandle {
    #[must_use]
    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    #[must_use]
    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// Subscribe a session. Idempotent.
    pub async fn join(
        &self,
        session_id: String,
        user_id: String,
        outbound: OutboundSender,
    ) -> Result<(), DcError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ChannelCommand::Join {
                session_id,
                user_id,
                outbound,
                respond_to: tx,
            })
            .await
            .map_err(|e| DcError::Internal(format!("channel send failed: {e}")))?;
        rx.await
            .map_err(|e| DcError::Internal(format!("response receive failed: {e}")))
    }

    /// Unsubscribe a session, releasing its token if it holds one.
    pub async fn leave(&self, session_id: String) -> Result<(), DcError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ChannelCommand::Leave {
                session_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| DcError::Internal(format!("channel send failed: {e}")))?;
        rx.await
            .map_err(|e| DcError::Internal(format!("response receive failed: {e}")))
    }

    /// Session ids of current members, in join order.
    pub async fn members(&self) -> Result<Vec<String>, DcError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ChannelCommand::Members { respond_to: tx })
            .await
            .map_err(|e| DcError::Internal(format!("channel send failed: {e}")))?;
        rx.await
            .map_err(|e| DcError::Internal(format!("response receive failed: {e}")))
    }

    /// Session id of the current token holder, if any.
    pub async fn active_transmitter(&self) -> Result<Option<String>, DcError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ChannelCommand::ActiveTransmitter { respond_to: tx })
            .await
            .map_err(|e| DcError::Internal(format!("channel send failed: {e}")))?;
        rx.await
            .map_err(|e| DcError::Internal(format!("response receive failed: {e}")))
    }

    /// Atomic grant-or-busy. Returns immediately either way.
    pub async fn request_transmission(
        &self,
        session_id: String,
    ) -> Result<TransmissionToken, DcError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ChannelCommand::RequestTransmission {
                session_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| DcError::Internal(format!("channel send failed: {e}")))?;
        rx.await
            .map_err(|e| DcError::Internal(format!("response receive failed: {e}")))?
    }

    /// Relay an audio frame sent by `session_id`. Non-blocking: if the
    /// mailbox is full the frame is dropped, never queued against the
    /// transport.
    pub fn relay_frame(&self, session_id: String, frame: AudioFrame) {
        if self
            .sender
            .try_send(ChannelCommand::RelayFrame { session_id, frame })
            .is_err()
        {
            observability::record_frame_dropped(&self.channel_id, "mailbox-full");
        }
    }

    /// Release a token. Idempotent: releasing a superseded token is a no-op.
    pub async fn release(&self, token_id: Uuid, reason: ReleaseReason) -> Result<(), DcError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ChannelCommand::Release {
                token_id,
                reason,
                respond_to: tx,
            })
            .await
            .map_err(|e| DcError::Internal(format!("channel send failed: {e}")))?;
        rx.await
            .map_err(|e| DcError::Internal(format!("response receive failed: {e}")))
    }

    /// Release the token iff `session_id` currently holds it. Fire-and-forget.
    pub async fn release_for(&self, session_id: String, reason: ReleaseReason) {
        let _ = self
            .sender
            .send(ChannelCommand::ReleaseFor { session_id, reason })
            .await;
    }

    /// Queue a channel-scoped broadcast for sequence stamping and fan-out.
    pub async fn broadcast(&self, event: ChannelEvent) -> Result<(), DcError> {
        self.sender
            .send(ChannelCommand::Broadcast { event })
            .await
            .map_err(|e| DcError::Internal(format!("channel send failed: {e}")))
    }
}

/// One subscribed session.
struct Member {
    session_id: String,
    user_id: String,
    outbound: OutboundSender,
}

/// State of the in-flight transmission.
struct ActiveTransmission {
    token: TransmissionToken,
    holder_user_id: String,
    started: Instant,
    last_frame_at: Instant,
    audio_ref: String,
}

/// The `ChannelActor` implementation.
pub struct ChannelActor {
    channel_id: String,
    kind: ChannelKind,
    receiver: mpsc::Receiver<ChannelCommand>,
    /// Own mailbox sender, handed to the transcription worker so results
    /// come back through this channel's sequence stamping.
    self_sender: mpsc::Sender<ChannelCommand>,
    cancel_token: CancellationToken,
    /// Join order; fan-out iterates this.
    members: Vec<Member>,
    active: Option<ActiveTransmission>,
    /// Per-channel sequence. Covers audio frames and control broadcasts.
    sequence: u64,
    idle_timeout: Duration,
    history: Arc<HistoryStore>,
    transcription: TranscriptionHandle,
}

impl ChannelActor {
    /// Spawn a channel actor. Returns the handle and the task join handle.
    pub fn spawn(
        channel_id: String,
        kind: ChannelKind,
        idle_timeout: Duration,
        cancel_token: CancellationToken,
        history: Arc<HistoryStore>,
        transcription: TranscriptionHandle,
    ) -> (ChannelActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(CHANNEL_MAILBOX_BUFFER);

        let actor = Self {
            channel_id: channel_id.clone(),
            kind,
            receiver,
            self_sender: sender.clone(),
            cancel_token,
            members: Vec::new(),
            active: None,
            sequence: 0,
            idle_timeout,
            history,
            transcription,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = ChannelActorHandle {
            sender,
            channel_id,
            kind,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "dc.actor.channel", fields(channel_id = %self.channel_id))]
    async fn run(mut self) {
        info!(
            target: "dc.actor.channel",
            channel_id = %self.channel_id,
            kind = ?self.kind,
            "ChannelActor started"
        );

        let mut idle_check = tokio::time::interval(IDLE_TICK);

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "dc.actor.channel",
                        channel_id = %self.channel_id,
                        "ChannelActor received cancellation signal"
                    );
                    if let Some(active) = self.active.take() {
                        self.finish_transmission(active, ReleaseReason::Disconnect).await;
                    }
                    break;
                }

                _ = idle_check.tick() => {
                    self.check_idle_timeout().await;
                }

                cmd = self.receiver.recv() => {
                    match cmd {
                        Some(command) => self.handle_command(command).await,
                        None => break,
                    }
                }
            }
        }

        info!(
            target: "dc.actor.channel",
            channel_id = %self.channel_id,
            members = self.members.len(),
            "ChannelActor stopped"
        );
    }

    async fn handle_command(&mut self, command: ChannelCommand) {
        match command {
            ChannelCommand::Join {
                session_id,
                user_id,
                outbound,
                respond_to,
            } => {
                self.handle_join(session_id, user_id, outbound);
                let _ = respond_to.send(());
            }

            ChannelCommand::Leave {
                session_id,
                respond_to,
            } => {
                self.handle_leave(&session_id).await;
                let _ = respond_to.send(());
            }

            ChannelCommand::Members { respond_to } => {
                let ids = self.members.iter().map(|m| m.session_id.clone()).collect();
                let _ = respond_to.send(ids);
            }

            ChannelCommand::ActiveTransmitter { respond_to } => {
                let holder = self.active.as_ref().map(|a| a.token.holder.clone());
                let _ = respond_to.send(holder);
            }

            ChannelCommand::RequestTransmission {
                session_id,
                respond_to,
            } => {
                let result = self.handle_request_transmission(session_id).await;
                let _ = respond_to.send(result);
            }

            ChannelCommand::RelayFrame { session_id, frame } => {
                self.handle_relay_frame(&session_id, frame);
            }

            ChannelCommand::Release {
                token_id,
                reason,
                respond_to,
            } => {
                self.handle_release(token_id, reason).await;
                let _ = respond_to.send(());
            }

            ChannelCommand::ReleaseFor { session_id, reason } => {
                let token_id = self
                    .active
                    .as_ref()
                    .filter(|a| a.token.holder == session_id)
                    .map(|a| a.token.token_id);
                if let Some(token_id) = token_id {
                    self.handle_release(token_id, reason).await;
                }
            }

            ChannelCommand::Broadcast { event } => {
                self.handle_broadcast(event);
            }
        }
    }

    fn handle_join(&mut self, session_id: String, user_id: String, outbound: OutboundSender) {
        if let Some(member) = self.members.iter_mut().find(|m| m.session_id == session_id) {
            // Re-join after reconnect: refresh the transport handle only.
            member.outbound = outbound;
            debug!(
                target: "dc.actor.channel",
                channel_id = %self.channel_id,
                session_id = %session_id,
                "Membership refreshed"
            );
        } else {
            self.members.push(Member {
                session_id: session_id.clone(),
                user_id,
                outbound,
            });
            info!(
                target: "dc.actor.channel",
                channel_id = %self.channel_id,
                session_id = %session_id,
                members = self.members.len(),
                "Session joined channel"
            );
        }
        observability::set_channel_members(&self.channel_id, self.members.len());
    }

    async fn handle_leave(&mut self, session_id: &str) {
        let held = self
            .active
            .as_ref()
            .filter(|a| a.token.holder == session_id)
            .map(|a| a.token.token_id);
        if let Some(token_id) = held {
            self.handle_release(token_id, ReleaseReason::ExplicitStop)
                .await;
        }

        let before = self.members.len();
        self.members.retain(|m| m.session_id != session_id);
        if self.members.len() < before {
            info!(
                target: "dc.actor.channel",
                channel_id = %self.channel_id,
                session_id = %session_id,
                members = self.members.len(),
                "Session left channel"
            );
        }
        observability::set_channel_members(&self.channel_id, self.members.len());
    }

    /// The arbiter. Exactly one of `PttGranted` / `ChannelBusy` per request,
    /// decided here while no other command can interleave.
    async fn handle_request_transmission(
        &mut self,
        session_id: String,
    ) -> Result<TransmissionToken, DcError> {
        let decision_start = Instant::now();

        let Some(member) = self.members.iter().find(|m| m.session_id == session_id) else {
            return Err(DcError::NotAMember(self.channel_id.clone()));
        };
        let user_id = member.user_id.clone();

        if let Some(active) = &self.active {
            observability::record_grant_decision(
                &self.channel_id,
                "busy",
                decision_start.elapsed(),
            );
            return Err(DcError::ChannelBusy {
                current_holder: active.holder_user_id.clone(),
            });
        }

        let sequence = self.next_sequence();
        let token_id = Uuid::new_v4();
        let token = TransmissionToken {
            token_id,
            channel_id: self.channel_id.clone(),
            holder: session_id,
            sequence,
            issued_at: Utc::now(),
        };
        let audio_ref = format!("audio/{}/{token_id}", self.channel_id);

        self.history
            .record_transmission_started(Transmission {
                transmission_id: token_id,
                channel_id: self.channel_id.clone(),
                user_id: user_id.clone(),
                started_at: token.issued_at,
                ended_at: None,
                duration_ms: None,
                audio_ref: audio_ref.clone(),
                transcription_status: dispatch_protocol::types::TranscriptionStatus::None,
                transcription_text: None,
                transcription_confidence: None,
                release_reason: None,
            })
            .await;

        let now = Instant::now();
        self.active = Some(ActiveTransmission {
            token: token.clone(),
            holder_user_id: user_id.clone(),
            started: now,
            last_frame_at: now,
            audio_ref,
        });

        self.fan_out(&Outbound::Control(ServerMessage::TransmissionStarted {
            channel_id: self.channel_id.clone(),
            user_id: user_id.clone(),
            sequence,
        }));

        observability::record_grant_decision(&self.channel_id, "granted", decision_start.elapsed());
        info!(
            target: "dc.actor.channel",
            channel_id = %self.channel_id,
            token_id = %token_id,
            user_id = %user_id,
            sequence,
            "Transmission granted"
        );
        Ok(token)
    }

    fn handle_relay_frame(&mut self, sender_id: &str, frame: AudioFrame) {
        let Some(active) = self.active.as_mut() else {
            observability::record_frame_dropped(&self.channel_id, "no-transmitter");
            return;
        };

        if frame.token_id != active.token.token_id {
            // Frame raced a release; benign, drop it.
            debug!(
                target: "dc.actor.channel",
                channel_id = %self.channel_id,
                token_id = %frame.token_id,
                "Dropping frame with stale token"
            );
            observability::record_frame_dropped(&self.channel_id, "stale-token");
            return;
        }

        if sender_id != active.token.holder {
            // The token is a capability bound to the session it was issued
            // to; a matching id from anyone else is spoofed, and must not
            // renew liveness.
            warn!(
                target: "dc.actor.channel",
                channel_id = %self.channel_id,
                session_id = %sender_id,
                "Dropping frame from a session that does not hold the token"
            );
            observability::record_frame_dropped(&self.channel_id, "not-holder");
            return;
        }

        active.last_frame_at = Instant::now();
        let holder = active.token.holder.clone();

        // Listeners never see the live capability id.
        let stamped = AudioFrame {
            token_id: Uuid::nil(),
            sequence: self.next_sequence(),
            ..frame
        };

        // Everyone but the transmitter hears the frame.
        let outbound = Outbound::Audio(stamped);
        for member in self.members.iter().filter(|m| m.session_id != holder) {
            if member.outbound.try_send(outbound.clone()).is_err() {
                observability::record_frame_dropped(&self.channel_id, "listener-backlog");
            }
        }
        observability::record_frame_relayed(&self.channel_id);
    }

    /// Idempotent release. Only the token id currently held does anything;
    /// the explicit stop, the idle sweep, and the grace sweep can all fire
    /// for the same transmission and exactly one wins.
    async fn handle_release(&mut self, token_id: Uuid, reason: ReleaseReason) {
        let current = self.active.as_ref().map(|a| a.token.token_id);
        if current != Some(token_id) {
            debug!(
                target: "dc.actor.channel",
                channel_id = %self.channel_id,
                token_id = %token_id,
                "Ignoring release of non-current token"
            );
            return;
        }

        if let Some(active) = self.active.take() {
            self.finish_transmission(active, reason).await;
        }
    }

    async fn finish_transmission(&mut self, active: ActiveTransmission, reason: ReleaseReason) {
        let duration = active.started.elapsed();
        let duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        let transmission_id = active.token.token_id;

        if let Err(e) = self
            .history
            .finalize_transmission(transmission_id, Utc::now(), duration_ms, reason)
            .await
        {
            warn!(
                target: "dc.actor.channel",
                channel_id = %self.channel_id,
                transmission_id = %transmission_id,
                error = %e,
                "Failed to finalize transmission record"
            );
        }

        let sequence = self.next_sequence();
        self.fan_out(&Outbound::Control(ServerMessage::TransmissionEnded {
            channel_id: self.channel_id.clone(),
            user_id: active.holder_user_id.clone(),
            transmission_id,
            duration_ms,
            reason,
            sequence,
        }));

        observability::record_release(&self.channel_id, release_reason_label(reason), duration);
        info!(
            target: "dc.actor.channel",
            channel_id = %self.channel_id,
            transmission_id = %transmission_id,
            duration_ms,
            reason = ?reason,
            "Transmission ended"
        );

        // Off the critical path: a full queue degrades the record, not the channel.
        let job = TranscriptionJob {
            transmission_id,
            channel_id: self.channel_id.clone(),
            audio_ref: active.audio_ref,
            duration_ms,
            notify: self.self_sender.clone(),
        };
        if self.transcription.try_submit(job).is_err() {
            warn!(
                target: "dc.actor.channel",
                channel_id = %self.channel_id,
                transmission_id = %transmission_id,
                "Transcription queue unavailable"
            );
            observability::record_transcription("failed");
            if let Err(e) = self.history.mark_transcription_failed(transmission_id).await {
                warn!(
                    target: "dc.actor.channel",
                    transmission_id = %transmission_id,
                    error = %e,
                    "Failed to record transcription failure"
                );
            }
        }
    }

    async fn check_idle_timeout(&mut self) {
        let expired = self
            .active
            .as_ref()
            .filter(|a| a.last_frame_at.elapsed() >= self.idle_timeout)
            .map(|a| a.token.token_id);

        if let Some(token_id) = expired {
            info!(
                target: "dc.actor.channel",
                channel_id = %self.channel_id,
                token_id = %token_id,
                "Reclaiming idle transmission token"
            );
            self.handle_release(token_id, ReleaseReason::IdleTimeout)
                .await;
        }
    }

    fn handle_broadcast(&mut self, event: ChannelEvent) {
        let sequence = self.next_sequence();
        let message = match event {
            ChannelEvent::AlertRaised { alert } => ServerMessage::AlertRaised {
                alert_id: alert.alert_id,
                channel_id: alert.channel_id,
                alert_type: alert.alert_type,
                raised_by: alert.raised_by,
                description: alert.description,
                raised_at: alert.raised_at,
                sequence: Some(sequence),
            },
            ChannelEvent::AlertAcknowledged { alert } => {
                let (acknowledged_by, acknowledged_at) = match (alert.acknowledged_by, alert.acknowledged_at) {
                    (Some(by), Some(at)) => (by, at),
                    _ => {
                        warn!(
                            target: "dc.actor.channel",
                            alert_id = %alert.alert_id,
                            "Acknowledged alert missing acknowledgment fields"
                        );
                        return;
                    }
                };
                ServerMessage::AlertAcknowledged {
                    alert_id: alert.alert_id,
                    acknowledged_by,
                    acknowledged_at,
                    sequence: Some(sequence),
                }
            }
            ChannelEvent::AlertResolved { alert } => {
                let (resolved_by, resolved_at) = match (alert.resolved_by, alert.resolved_at) {
                    (Some(by), Some(at)) => (by, at),
                    _ => {
                        warn!(
                            target: "dc.actor.channel",
                            alert_id = %alert.alert_id,
                            "Resolved alert missing resolution fields"
                        );
                        return;
                    }
                };
                ServerMessage::AlertResolved {
                    alert_id: alert.alert_id,
                    resolved_by,
                    notes: alert.resolution_notes.unwrap_or_default(),
                    resolved_at,
                    sequence: Some(sequence),
                }
            }
            ChannelEvent::TranscriptionUpdate {
                transmission_id,
                text,
                confidence,
            } => ServerMessage::TranscriptionUpdate {
                transmission_id,
                channel_id: self.channel_id.clone(),
                text,
                confidence,
                sequence,
            },
        };

        self.fan_out(&Outbound::Control(message));
    }

    /// Deliver to every member without blocking. A slow listener loses
    /// events; it never delays the rest of the channel.
    fn fan_out(&self, outbound: &Outbound) {
        for member in &self.members {
            let _ = member.outbound.try_send(outbound.clone());
        }
    }

    fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }
}

fn release_reason_label(reason: ReleaseReason) -> &'static str {
    match reason {
        ReleaseReason::ExplicitStop => "explicit-stop",
        ReleaseReason::Disconnect => "disconnect",
        ReleaseReason::IdleTimeout => "idle-timeout",
        ReleaseReason::ForcedByEmergency => "forced-by-emergency",
    }
}
