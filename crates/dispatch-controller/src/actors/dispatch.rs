//! `DispatchActor` - singleton actor that owns the session registry and
//! supervises the channel actors.
//!
//! Everything identity-scoped goes through here: session open/resume/
//! displacement, heartbeat liveness, the grace-period sweep, channel
//! subscription, and the emergency alert state machine. Audio does NOT:
//! connections route frames straight to the owning `ChannelActor` via the
//! handle returned from `join_channel`, so relay latency never contends
//! on this mailbox.

use crate::alerts::EmergencyAlert;
use crate::config::Config;
use crate::errors::DcError;
use crate::history::HistoryStore;
use crate::observability;
use crate::transcription::TranscriptionHandle;

use super::channel::{ChannelActor, ChannelActorHandle};
use super::messages::{ChannelEvent, Outbound, OutboundSender};
use super::sessions::{OpenOutcome, SessionEntry, SessionRegistry};

use dispatch_protocol::messages::ServerMessage;
use dispatch_protocol::types::{AlertType, ReleaseReason};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Mailbox buffer for the dispatch actor.
const DISPATCH_MAILBOX_BUFFER: usize = 256;

/// Resolution of the heartbeat and grace sweeps.
const SWEEP_TICK: Duration = Duration::from_secs(1);

/// Result of opening a session.
#[derive(Debug, Clone)]
pub struct SessionOpened {
    pub session_id: String,
    /// True when a prior session was resumed within the grace window.
    pub resumed: bool,
    /// Channel subscriptions replayed on resume.
    pub channels: Vec<String>,
}

/// Instance-level counters for the stats endpoint.
#[derive(Debug, Clone, Copy)]
pub struct DispatchStats {
    pub sessions: usize,
    pub channels: usize,
}

enum DispatchCommand {
    OpenSession {
        user_id: String,
        display_name: String,
        outbound: OutboundSender,
        respond_to: oneshot::Sender<SessionOpened>,
    },
    CloseSession {
        session_id: String,
    },
    ConnectionLost {
        session_id: String,
    },
    Heartbeat {
        session_id: String,
        respond_to: oneshot::Sender<bool>,
    },
    JoinChannel {
        session_id: String,
        channel_id: String,
        respond_to: oneshot::Sender<Result<ChannelActorHandle, DcError>>,
    },
    LeaveChannel {
        session_id: String,
        channel_id: String,
        respond_to: oneshot::Sender<Result<(), DcError>>,
    },
    RaiseAlert {
        session_id: String,
        channel_id: Option<String>,
        alert_type: AlertType,
        description: String,
        respond_to: oneshot::Sender<Result<EmergencyAlert, DcError>>,
    },
    AcknowledgeAlert {
        session_id: String,
        alert_id: Uuid,
        respond_to: oneshot::Sender<Result<EmergencyAlert, DcError>>,
    },
    ResolveAlert {
        session_id: String,
        alert_id: Uuid,
        notes: String,
        respond_to: oneshot::Sender<Result<EmergencyAlert, DcError>>,
    },
    GetStats {
        respond_to: oneshot::Sender<DispatchStats>,
    },
}

/// Handle to the `DispatchActor`.
#[derive(Clone)]
pub struct DispatchActorHandle {
    sender: mpsc::Sender<DispatchCommand>,
    cancel_token: CancellationToken,
}

impl DispatchActorHandle {
    /// Open (or resume, or displace into) a session for a verified identity.
    pub async fn open_session(
        &self,
        user_id: String,
        display_name: String,
        outbound: OutboundSender,
    ) -> Result<SessionOpened, DcError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(DispatchCommand::OpenSession {
                user_id,
                display_name,
                outbound,
                respond_to: tx,
            })
            .await
            .map_err(|e| DcError::Internal(format!("channel send failed: {e}")))?;
        rx.await
            .map_err(|e| DcError::Internal(format!("response receive failed: {e}")))
    }

    /// Remove a session entirely (displacement teardown, grace expiry).
    pub async fn close_session(&self, session_id: String) {
        let _ = self
            .sender
            .send(DispatchCommand::CloseSession { session_id })
            .await;
    }

    /// Transport dropped; the session enters its reconnect grace window.
    pub async fn connection_lost(&self, session_id: String) {
        let _ = self
            .sender
            .send(DispatchCommand::ConnectionLost { session_id })
            .await;
    }

    /// Record a heartbeat. Returns false for an unknown session.
    pub async fn heartbeat(&self, session_id: String) -> Result<bool, DcError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(DispatchCommand::Heartbeat {
                session_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| DcError::Internal(format!("channel send failed: {e}")))?;
        rx.await
            .map_err(|e| DcError::Internal(format!("response receive failed: {e}")))
    }

    /// Subscribe a session to a channel. Returns the channel handle so the
    /// connection can route audio frames to it directly.
    pub async fn join_channel(
        &self,
        session_id: String,
        channel_id: String,
    ) -> Result<ChannelActorHandle, DcError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(DispatchCommand::JoinChannel {
                session_id,
                channel_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| DcError::Internal(format!("channel send failed: {e}")))?;
        rx.await
            .map_err(|e| DcError::Internal(format!("response receive failed: {e}")))?
    }

    /// Unsubscribe a session from a channel.
    pub async fn leave_channel(
        &self,
        session_id: String,
        channel_id: String,
    ) -> Result<(), DcError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(DispatchCommand::LeaveChannel {
                session_id,
                channel_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| DcError::Internal(format!("channel send failed: {e}")))?;
        rx.await
            .map_err(|e| DcError::Internal(format!("response receive failed: {e}")))?
    }

    /// Raise an emergency alert, channel-scoped or instance-wide.
    pub async fn raise_alert(
        &self,
        session_id: String,
        channel_id: Option<String>,
        alert_type: AlertType,
        description: String,
    ) -> Result<EmergencyAlert, DcError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(DispatchCommand::RaiseAlert {
                session_id,
                channel_id,
                alert_type,
                description,
                respond_to: tx,
            })
            .await
            .map_err(|e| DcError::Internal(format!("channel send failed: {e}")))?;
        rx.await
            .map_err(|e| DcError::Internal(format!("response receive failed: {e}")))?
    }

    /// Acknowledge an active alert.
    pub async fn acknowledge_alert(
        &self,
        session_id: String,
        alert_id: Uuid,
    ) -> Result<EmergencyAlert, DcError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(DispatchCommand::AcknowledgeAlert {
                session_id,
                alert_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| DcError::Internal(format!("channel send failed: {e}")))?;
        rx.await
            .map_err(|e| DcError::Internal(format!("response receive failed: {e}")))?
    }

    /// Resolve an acknowledged alert.
    pub async fn resolve_alert(
        &self,
        session_id: String,
        alert_id: Uuid,
        notes: String,
    ) -> Result<EmergencyAlert, DcError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(DispatchCommand::ResolveAlert {
                session_id,
                alert_id,
                notes,
                respond_to: tx,
            })
            .await
            .map_err(|e| DcError::Internal(format!("channel send failed: {e}")))?;
        rx.await
            .map_err(|e| DcError::Internal(format!("response receive failed: {e}")))?
    }

    /// Instance counters.
    pub async fn stats(&self) -> Result<DispatchStats, DcError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(DispatchCommand::GetStats { respond_to: tx })
            .await
            .map_err(|e| DcError::Internal(format!("channel send failed: {e}")))?;
        rx.await
            .map_err(|e| DcError::Internal(format!("response receive failed: {e}")))
    }

    /// Cancel the actor tree.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }
}

/// The `DispatchActor` implementation.
pub struct DispatchActor {
    dc_id: String,
    receiver: mpsc::Receiver<DispatchCommand>,
    cancel_token: CancellationToken,
    sessions: SessionRegistry,
    channels: HashMap<String, ChannelActorHandle>,
    heartbeat_timeout: Duration,
    reconnect_grace: Duration,
    history: Arc<HistoryStore>,
}

impl DispatchActor {
    /// Spawn the dispatch actor and one channel actor per catalog entry.
    pub fn spawn(
        config: &Config,
        history: Arc<HistoryStore>,
        transcription: TranscriptionHandle,
        cancel_token: CancellationToken,
    ) -> (DispatchActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(DISPATCH_MAILBOX_BUFFER);

        let mut channels = HashMap::new();
        for spec in &config.channels {
            let (handle, _task) = ChannelActor::spawn(
                spec.id.clone(),
                spec.kind,
                config.idle_timeout(),
                cancel_token.child_token(),
                Arc::clone(&history),
                transcription.clone(),
            );
            channels.insert(spec.id.clone(), handle);
        }

        let actor = Self {
            dc_id: config.dc_id.clone(),
            receiver,
            cancel_token: cancel_token.clone(),
            sessions: SessionRegistry::new(),
            channels,
            heartbeat_timeout: config.heartbeat_timeout(),
            reconnect_grace: config.reconnect_grace(),
            history,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = DispatchActorHandle {
            sender,
            cancel_token,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "dc.actor.dispatch", fields(dc_id = %self.dc_id))]
    async fn run(mut self) {
        info!(
            target: "dc.actor.dispatch",
            dc_id = %self.dc_id,
            channels = self.channels.len(),
            "DispatchActor started"
        );

        let mut sweep = tokio::time::interval(SWEEP_TICK);

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "dc.actor.dispatch",
                        dc_id = %self.dc_id,
                        "DispatchActor received cancellation signal"
                    );
                    break;
                }

                _ = sweep.tick() => {
                    self.run_sweeps().await;
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
            target: "dc.actor.dispatch",
            dc_id = %self.dc_id,
            sessions = self.sessions.len(),
            "DispatchActor stopped"
        );
    }

    async fn handle_command(&mut self, command: DispatchCommand) {
        match command {
            DispatchCommand::OpenSession {
                user_id,
                display_name,
                outbound,
                respond_to,
            } => {
                let opened = self.handle_open_session(&user_id, &display_name, outbound).await;
                let _ = respond_to.send(opened);
            }

            DispatchCommand::CloseSession { session_id } => {
                if let Some(entry) = self.sessions.close(&session_id) {
                    self.teardown_session(&entry, ReleaseReason::Disconnect).await;
                }
                observability::set_sessions_active(self.sessions.len());
            }

            DispatchCommand::ConnectionLost { session_id } => {
                self.sessions.mark_reconnecting(&session_id);
            }

            DispatchCommand::Heartbeat {
                session_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.sessions.touch_heartbeat(&session_id));
            }

            DispatchCommand::JoinChannel {
                session_id,
                channel_id,
                respond_to,
            } => {
                let result = self.handle_join_channel(&session_id, &channel_id).await;
                let _ = respond_to.send(result);
            }

            DispatchCommand::LeaveChannel {
                session_id,
                channel_id,
                respond_to,
            } => {
                let result = self.handle_leave_channel(&session_id, &channel_id).await;
                let _ = respond_to.send(result);
            }

            DispatchCommand::RaiseAlert {
                session_id,
                channel_id,
                alert_type,
                description,
                respond_to,
            } => {
                let result = self
                    .handle_raise_alert(&session_id, channel_id, alert_type, description)
                    .await;
                let _ = respond_to.send(result);
            }

            DispatchCommand::AcknowledgeAlert {
                session_id,
                alert_id,
                respond_to,
            } => {
                let result = self.handle_acknowledge_alert(&session_id, alert_id).await;
                let _ = respond_to.send(result);
            }

            DispatchCommand::ResolveAlert {
                session_id,
                alert_id,
                notes,
                respond_to,
            } => {
                let result = self.handle_resolve_alert(&session_id, alert_id, notes).await;
                let _ = respond_to.send(result);
            }

            DispatchCommand::GetStats { respond_to } => {
                let _ = respond_to.send(DispatchStats {
                    sessions: self.sessions.len(),
                    channels: self.channels.len(),
                });
            }
        }
    }

    async fn handle_open_session(
        &mut self,
        user_id: &str,
        display_name: &str,
        outbound: OutboundSender,
    ) -> SessionOpened {
        let outcome = self.sessions.open(user_id, display_name, outbound.clone());
        let opened = match outcome {
            OpenOutcome::New { session_id } => SessionOpened {
                session_id,
                resumed: false,
                channels: Vec::new(),
            },
            OpenOutcome::Resumed {
                session_id,
                channels,
            } => {
                // Replay subscriptions so channel actors hold the fresh
                // transport handle.
                for channel_id in &channels {
                    if let Some(channel) = self.channels.get(channel_id) {
                        if let Err(e) = channel
                            .join(session_id.clone(), user_id.to_string(), outbound.clone())
                            .await
                        {
                            warn!(
                                target: "dc.actor.dispatch",
                                session_id = %session_id,
                                channel_id = %channel_id,
                                error = %e,
                                "Failed to replay subscription on resume"
                            );
                        }
                    }
                }
                SessionOpened {
                    session_id,
                    resumed: true,
                    channels,
                }
            }
            OpenOutcome::Displaced {
                session_id,
                displaced,
            } => {
                SessionRegistry::notify_displaced(
                    &displaced,
                    "Replaced by a newer connection for this identity".to_string(),
                );
                self.teardown_session(&displaced, ReleaseReason::Disconnect)
                    .await;
                SessionOpened {
                    session_id,
                    resumed: false,
                    channels: Vec::new(),
                }
            }
        };
        observability::set_sessions_active(self.sessions.len());
        opened
    }

    /// Release held tokens and drop channel memberships of a removed session.
    async fn teardown_session(&self, entry: &SessionEntry, reason: ReleaseReason) {
        for channel_id in &entry.channels {
            if let Some(channel) = self.channels.get(channel_id) {
                channel.release_for(entry.session_id.clone(), reason).await;
                if let Err(e) = channel.leave(entry.session_id.clone()).await {
                    warn!(
                        target: "dc.actor.dispatch",
                        session_id = %entry.session_id,
                        channel_id = %channel_id,
                        error = %e,
                        "Failed to remove session from channel"
                    );
                }
            }
        }
    }

    async fn handle_join_channel(
        &mut self,
        session_id: &str,
        channel_id: &str,
    ) -> Result<ChannelActorHandle, DcError> {
        let (user_id, outbound) = {
            let entry = self
                .sessions
                .get(session_id)
                .ok_or_else(|| DcError::SessionNotFound(session_id.to_string()))?;
            (entry.user_id.clone(), entry.outbound.clone())
        };

        let channel = self
            .channels
            .get(channel_id)
            .ok_or_else(|| DcError::ChannelNotFound(channel_id.to_string()))?;

        channel
            .join(session_id.to_string(), user_id, outbound)
            .await?;
        self.sessions.record_join(session_id, channel_id);
        Ok(channel.clone())
    }

    async fn handle_leave_channel(
        &mut self,
        session_id: &str,
        channel_id: &str,
    ) -> Result<(), DcError> {
        if self.sessions.get(session_id).is_none() {
            return Err(DcError::SessionNotFound(session_id.to_string()));
        }
        let channel = self
            .channels
            .get(channel_id)
            .ok_or_else(|| DcError::ChannelNotFound(channel_id.to_string()))?;

        channel.leave(session_id.to_string()).await?;
        self.sessions.record_leave(session_id, channel_id);
        Ok(())
    }

    async fn handle_raise_alert(
        &mut self,
        session_id: &str,
        channel_id: Option<String>,
        alert_type: AlertType,
        description: String,
    ) -> Result<EmergencyAlert, DcError> {
        let raised_by = self
            .sessions
            .get(session_id)
            .map(|e| e.user_id.clone())
            .ok_or_else(|| DcError::SessionNotFound(session_id.to_string()))?;

        if let Some(id) = &channel_id {
            if !self.channels.contains_key(id) {
                return Err(DcError::ChannelNotFound(id.clone()));
            }
        }

        let alert = EmergencyAlert::raise(channel_id, alert_type, raised_by, description);
        self.history.record_alert(alert.clone()).await;
        observability::record_alert_event("raised");
        info!(
            target: "dc.actor.dispatch",
            alert_id = %alert.alert_id,
            alert_type = ?alert.alert_type,
            channel_id = ?alert.channel_id,
            "Emergency alert raised"
        );

        self.broadcast_alert(&alert, ChannelEvent::AlertRaised {
            alert: alert.clone(),
        })
        .await;
        Ok(alert)
    }

    async fn handle_acknowledge_alert(
        &mut self,
        session_id: &str,
        alert_id: Uuid,
    ) -> Result<EmergencyAlert, DcError> {
        let user_id = self
            .sessions
            .get(session_id)
            .map(|e| e.user_id.clone())
            .ok_or_else(|| DcError::SessionNotFound(session_id.to_string()))?;

        let alert = self.history.acknowledge_alert(alert_id, &user_id).await?;
        observability::record_alert_event("acknowledged");

        self.broadcast_alert(&alert, ChannelEvent::AlertAcknowledged {
            alert: alert.clone(),
        })
        .await;
        Ok(alert)
    }

    async fn handle_resolve_alert(
        &mut self,
        session_id: &str,
        alert_id: Uuid,
        notes: String,
    ) -> Result<EmergencyAlert, DcError> {
        let user_id = self
            .sessions
            .get(session_id)
            .map(|e| e.user_id.clone())
            .ok_or_else(|| DcError::SessionNotFound(session_id.to_string()))?;

        let alert = self.history.resolve_alert(alert_id, &user_id, notes).await?;
        observability::record_alert_event("resolved");

        self.broadcast_alert(&alert, ChannelEvent::AlertResolved {
            alert: alert.clone(),
        })
        .await;
        Ok(alert)
    }

    /// Route an alert event: channel-scoped alerts go through the owning
    /// channel actor for sequence stamping; global alerts fan out to every
    /// connected session with no sequence.
    async fn broadcast_alert(&self, alert: &EmergencyAlert, event: ChannelEvent) {
        match &alert.channel_id {
            Some(channel_id) => {
                if let Some(channel) = self.channels.get(channel_id) {
                    if let Err(e) = channel.broadcast(event).await {
                        warn!(
                            target: "dc.actor.dispatch",
                            alert_id = %alert.alert_id,
                            channel_id = %channel_id,
                            error = %e,
                            "Failed to broadcast alert to channel"
                        );
                    }
                } else {
                    warn!(
                        target: "dc.actor.dispatch",
                        alert_id = %alert.alert_id,
                        channel_id = %channel_id,
                        "Alert references a channel this instance does not serve"
                    );
                }
            }
            None => {
                if let Some(message) = global_alert_message(event) {
                    for outbound in self.sessions.connected_outbounds() {
                        let _ = outbound.try_send(Outbound::Control(message.clone()));
                    }
                }
            }
        }
    }

    async fn run_sweeps(&mut self) {
        let demoted = self.sessions.sweep_heartbeats(self.heartbeat_timeout);
        for session_id in &demoted {
            info!(
                target: "dc.actor.dispatch",
                session_id = %session_id,
                "Heartbeat stale, session demoted to reconnecting"
            );
        }

        let expired = self.sessions.sweep_grace(self.reconnect_grace);
        for entry in &expired {
            info!(
                target: "dc.actor.dispatch",
                session_id = %entry.session_id,
                user_id = %entry.user_id,
                "Reconnect grace expired, session removed"
            );
            self.teardown_session(entry, ReleaseReason::Disconnect).await;
        }

        if !demoted.is_empty() || !expired.is_empty() {
            observability::set_sessions_active(self.sessions.len());
        }
    }
}

/// Build the wire message for a global (un-sequenced) alert event.
/// Transcription updates are always channel-scoped and never pass through
/// here; they yield `None`.
fn global_alert_message(event: ChannelEvent) -> Option<ServerMessage> {
    match event {
        ChannelEvent::AlertRaised { alert } => Some(ServerMessage::AlertRaised {
            alert_id: alert.alert_id,
            channel_id: alert.channel_id,
            alert_type: alert.alert_type,
            raised_by: alert.raised_by,
            description: alert.description,
            raised_at: alert.raised_at,
            sequence: None,
        }),
        ChannelEvent::AlertAcknowledged { alert } => Some(ServerMessage::AlertAcknowledged {
            alert_id: alert.alert_id,
            acknowledged_by: alert.acknowledged_by.unwrap_or_default(),
            acknowledged_at: alert.acknowledged_at.unwrap_or_else(chrono::Utc::now),
            sequence: None,
        }),
        ChannelEvent::AlertResolved { alert } => Some(ServerMessage::AlertResolved {
            alert_id: alert.alert_id,
            resolved_by: alert.resolved_by.unwrap_or_default(),
            notes: alert.resolution_notes.unwrap_or_default(),
            resolved_at: alert.resolved_at.unwrap_or_else(chrono::Utc::now),
            sequence: None,
        }),
        ChannelEvent::TranscriptionUpdate { .. } => None,
    }
}
