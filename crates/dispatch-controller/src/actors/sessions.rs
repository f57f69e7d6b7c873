//! Session registry.
//!
//! Single-writer table owned by the `DispatchActor` — its mailbox is the
//! exclusion point, so no locks live here. Sessions are the unit of
//! identity for all downstream authorization (channel membership, alert
//! authority).

use super::messages::{Outbound, OutboundSender};
use crate::resilience::ConnectionState;
use dispatch_protocol::messages::ServerMessage;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One live (or resumable) session.
#[derive(Debug)]
pub struct SessionEntry {
    pub session_id: String,
    pub user_id: String,
    pub display_name: String,
    pub outbound: OutboundSender,
    pub state: ConnectionState,
    /// Subscribed channel ids, insertion order.
    pub channels: Vec<String>,
    pub last_heartbeat: Instant,
    /// Set while `Reconnecting`; drives the grace sweep.
    pub disconnected_at: Option<Instant>,
}

impl SessionEntry {
    /// Apply a state change through the connection state machine. Illegal
    /// transitions are refused and leave the entry untouched.
    fn transition(&mut self, next: ConnectionState) -> bool {
        if self.state.can_transition_to(next) {
            self.state = next;
            true
        } else {
            warn!(
                target: "dc.sessions",
                session_id = %self.session_id,
                from = ?self.state,
                to = ?next,
                "Refusing illegal connection state transition"
            );
            false
        }
    }
}

/// Result of an `open` call.
#[derive(Debug)]
pub enum OpenOutcome {
    /// Fresh session for a previously unseen identity.
    New { session_id: String },
    /// A `Reconnecting` session for this identity was resumed; its
    /// subscriptions must be replayed against the channel actors.
    Resumed {
        session_id: String,
        channels: Vec<String>,
    },
    /// A live session for this identity was displaced (last-writer-wins).
    /// The displaced entry must be torn down by the caller.
    Displaced {
        session_id: String,
        displaced: SessionEntry,
    },
}

impl OpenOutcome {
    #[must_use]
    pub fn session_id(&self) -> &str {
        match self {
            OpenOutcome::New { session_id }
            | OpenOutcome::Resumed { session_id, .. }
            | OpenOutcome::Displaced { session_id, .. } => session_id,
        }
    }
}

/// Registry of sessions by id, with an identity index.
#[derive(Default)]
pub struct SessionRegistry {
    by_id: HashMap<String, SessionEntry>,
    /// `user_id` -> `session_id`; one live session per identity.
    by_user: HashMap<String, String>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session for a verified identity.
    ///
    /// Displacement policy: if the identity already holds a `Connected`
    /// session, the old one is removed and returned for teardown — the
    /// new connection always wins, avoiding split-brain PTT ownership.
    /// A `Reconnecting` session within its grace window is resumed
    /// instead, keeping its subscriptions.
    pub fn open(
        &mut self,
        user_id: &str,
        display_name: &str,
        outbound: OutboundSender,
    ) -> OpenOutcome {
        if let Some(existing_id) = self.by_user.get(user_id).cloned() {
            if let Some(entry) = self.by_id.get_mut(&existing_id) {
                if entry.state == ConnectionState::Reconnecting
                    && entry.transition(ConnectionState::Connected)
                {
                    // Resume: refresh the transport handle, keep subscriptions.
                    entry.outbound = outbound;
                    entry.disconnected_at = None;
                    entry.last_heartbeat = Instant::now();
                    info!(
                        target: "dc.sessions",
                        session_id = %existing_id,
                        user_id = %user_id,
                        channels = entry.channels.len(),
                        "Session resumed within grace window"
                    );
                    return OpenOutcome::Resumed {
                        session_id: existing_id,
                        channels: entry.channels.clone(),
                    };
                }
            }

            // Live session for the same identity: displace it.
            if let Some(displaced) = self.by_id.remove(&existing_id) {
                self.by_user.remove(user_id);
                let session_id = self.insert_new(user_id, display_name, outbound);
                info!(
                    target: "dc.sessions",
                    old_session_id = %displaced.session_id,
                    new_session_id = %session_id,
                    user_id = %user_id,
                    "Session displaced by newer connection"
                );
                return OpenOutcome::Displaced {
                    session_id,
                    displaced,
                };
            }
        }

        let session_id = self.insert_new(user_id, display_name, outbound);
        OpenOutcome::New { session_id }
    }

    fn insert_new(&mut self, user_id: &str, display_name: &str, outbound: OutboundSender) -> String {
        let session_id = Uuid::new_v4().to_string();
        let entry = SessionEntry {
            session_id: session_id.clone(),
            user_id: user_id.to_string(),
            display_name: display_name.to_string(),
            outbound,
            state: ConnectionState::Connected,
            channels: Vec::new(),
            last_heartbeat: Instant::now(),
            disconnected_at: None,
        };
        self.by_id.insert(session_id.clone(), entry);
        self.by_user
            .insert(user_id.to_string(), session_id.clone());
        session_id
    }

    /// Remove a session entirely. Returns the entry for teardown.
    pub fn close(&mut self, session_id: &str) -> Option<SessionEntry> {
        let entry = self.by_id.remove(session_id)?;
        self.by_user.remove(&entry.user_id);
        Some(entry)
    }

    /// Record a heartbeat. Returns false for an unknown session.
    pub fn touch_heartbeat(&mut self, session_id: &str) -> bool {
        match self.by_id.get_mut(session_id) {
            Some(entry) => {
                entry.last_heartbeat = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Transport loss: demote to `Reconnecting` and start the grace clock.
    /// Refused by the state machine for anything but a `Connected`
    /// session, so a duplicate loss signal cannot restart the clock.
    pub fn mark_reconnecting(&mut self, session_id: &str) -> bool {
        match self.by_id.get_mut(session_id) {
            Some(entry) => {
                if entry.transition(ConnectionState::Reconnecting) {
                    entry.disconnected_at = Some(Instant::now());
                    debug!(
                        target: "dc.sessions",
                        session_id = %session_id,
                        "Session reconnecting, grace period started"
                    );
                    true
                } else {
                    false
                }
            }
            _ => false,
        }
    }

    /// Record a channel subscription (idempotent).
    pub fn record_join(&mut self, session_id: &str, channel_id: &str) {
        if let Some(entry) = self.by_id.get_mut(session_id) {
            if !entry.channels.iter().any(|c| c == channel_id) {
                entry.channels.push(channel_id.to_string());
            }
        }
    }

    /// Remove a channel subscription.
    pub fn record_leave(&mut self, session_id: &str, channel_id: &str) {
        if let Some(entry) = self.by_id.get_mut(session_id) {
            entry.channels.retain(|c| c != channel_id);
        }
    }

    /// Look up a session.
    #[must_use]
    pub fn get(&self, session_id: &str) -> Option<&SessionEntry> {
        self.by_id.get(session_id)
    }

    /// Number of registered sessions (any live state).
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Outbound handles of `Connected` sessions, for global fan-out.
    #[must_use]
    pub fn connected_outbounds(&self) -> Vec<OutboundSender> {
        self.by_id
            .values()
            .filter(|e| e.state == ConnectionState::Connected)
            .map(|e| e.outbound.clone())
            .collect()
    }

    /// Demote `Connected` sessions with stale heartbeats (half-open
    /// transport detection). Returns the demoted session ids.
    pub fn sweep_heartbeats(&mut self, timeout: Duration) -> Vec<String> {
        let now = Instant::now();
        let stale: Vec<String> = self
            .by_id
            .values()
            .filter(|e| {
                e.state == ConnectionState::Connected
                    && now.duration_since(e.last_heartbeat) >= timeout
            })
            .map(|e| e.session_id.clone())
            .collect();

        for session_id in &stale {
            self.mark_reconnecting(session_id);
        }
        stale
    }

    /// Remove `Reconnecting` sessions whose grace window expired.
    /// Returns the removed entries for token/membership teardown.
    pub fn sweep_grace(&mut self, grace: Duration) -> Vec<SessionEntry> {
        let now = Instant::now();
        let expired: Vec<String> = self
            .by_id
            .values()
            .filter(|e| {
                e.state == ConnectionState::Reconnecting
                    && e.disconnected_at
                        .is_some_and(|at| now.duration_since(at) >= grace)
            })
            .map(|e| e.session_id.clone())
            .collect();

        expired
            .iter()
            .filter_map(|id| self.close(id))
            .collect()
    }

    /// Best-effort notification to a displaced connection before teardown.
    pub fn notify_displaced(displaced: &SessionEntry, reason: String) {
        let _ = displaced
            .outbound
            .try_send(Outbound::Control(ServerMessage::SessionReplaced { reason }));
    }
}
