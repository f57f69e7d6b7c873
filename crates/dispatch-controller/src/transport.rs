//! WebSocket transport.
//!
//! One task per connection. Control traffic is type-tagged JSON text,
//! audio is binary frames (see `dispatch_protocol::codec`). The task
//! routes audio straight to the owning channel actor via handles cached
//! at join time; only identity-scoped work goes through the dispatch
//! actor.
//!
//! Abnormal transport loss never destroys the session here. The loop
//! exits, the session is demoted to reconnecting, and the grace sweep or
//! a resumed connection decides its fate. A clean client Close is an
//! explicit logout and closes the session immediately instead.

use crate::actors::{ChannelActorHandle, DispatchActorHandle, Outbound};
use crate::errors::DcError;
use crate::routes::AppState;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use dispatch_protocol::codec;
use dispatch_protocol::messages::{ClientMessage, ServerMessage};
use dispatch_protocol::types::{ReleaseReason, TransmissionToken};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

/// Per-connection outbound queue depth. A listener this far behind on a
/// live channel is better served by dropped frames than by backpressure
/// into the relay.
const OUTBOUND_BUFFER: usize = 256;

/// Identity header set by the fronting proxy after authentication.
const USER_ID_HEADER: &str = "x-dispatch-user-id";
/// Optional display name header.
const USER_NAME_HEADER: &str = "x-dispatch-user-name";

/// Handler for `GET /v1/ws`.
///
/// Upgrades to a WebSocket once the proxy-verified identity headers are
/// present. Without an identity there is no session to open.
pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(user_id) = header_value(&headers, USER_ID_HEADER) else {
        return (StatusCode::UNAUTHORIZED, "missing identity header").into_response();
    };
    let display_name = header_value(&headers, USER_NAME_HEADER).unwrap_or_else(|| user_id.clone());

    ws.on_upgrade(move |socket| run_connection(socket, state, user_id, display_name))
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .filter(|s| !s.is_empty())
}

/// Per-connection state.
struct ClientConnection {
    session_id: String,
    user_id: String,
    dispatch: DispatchActorHandle,
    /// Channel handles cached at join time; audio routing never touches
    /// the dispatch actor.
    channels: HashMap<String, ChannelActorHandle>,
    /// Token held by this connection, if transmitting.
    current_token: Option<TransmissionToken>,
}

#[instrument(skip_all, name = "dc.transport.connection", fields(user_id = %user_id))]
async fn run_connection(
    mut socket: WebSocket,
    state: Arc<AppState>,
    user_id: String,
    display_name: String,
) {
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Outbound>(OUTBOUND_BUFFER);

    let opened = match state
        .dispatch
        .open_session(user_id.clone(), display_name, outbound_tx)
        .await
    {
        Ok(opened) => opened,
        Err(e) => {
            let _ = send_control(&mut socket, &error_message(&e)).await;
            return;
        }
    };

    let mut conn = ClientConnection {
        session_id: opened.session_id.clone(),
        user_id: user_id.clone(),
        dispatch: state.dispatch.clone(),
        channels: HashMap::new(),
        current_token: None,
    };

    // Resume: re-acquire channel handles for replayed subscriptions so
    // audio routing works without a fresh join round-trip.
    for channel_id in &opened.channels {
        match conn
            .dispatch
            .join_channel(conn.session_id.clone(), channel_id.clone())
            .await
        {
            Ok(handle) => {
                conn.channels.insert(channel_id.clone(), handle);
            }
            Err(e) => warn!(
                target: "dc.transport",
                session_id = %conn.session_id,
                channel_id = %channel_id,
                error = %e,
                "Failed to re-acquire channel on resume"
            ),
        }
    }

    let ready = ServerMessage::SessionReady {
        session_id: opened.session_id.clone(),
        user_id: user_id.clone(),
        resumed: opened.resumed,
        reconnect: state.config.reconnect_policy(),
    };
    if send_control(&mut socket, &ready).await.is_err() {
        state.dispatch.connection_lost(conn.session_id).await;
        return;
    }

    info!(
        target: "dc.transport",
        session_id = %conn.session_id,
        user_id = %user_id,
        resumed = opened.resumed,
        "Connection established"
    );

    loop {
        tokio::select! {
            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(Outbound::Control(msg)) => {
                        let displaced = matches!(msg, ServerMessage::SessionReplaced { .. });
                        if send_control(&mut socket, &msg).await.is_err() {
                            break;
                        }
                        if displaced {
                            // The registry no longer knows this connection.
                            let _ = socket.close().await;
                            return;
                        }
                    }
                    Some(Outbound::Audio(frame)) => {
                        match codec::encode_frame(&frame) {
                            Ok(bytes) => {
                                if socket.send(Message::Binary(bytes.to_vec())).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!(
                                    target: "dc.transport",
                                    error = %e,
                                    "Failed to encode outbound frame"
                                );
                            }
                        }
                    }
                    None => break,
                }
            }

            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if conn.handle_text(&mut socket, &text).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        conn.handle_binary(&data);
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) => {
                        // Explicit logout, not transport loss: no grace
                        // window, the session is torn down now.
                        info!(
                            target: "dc.transport",
                            session_id = %conn.session_id,
                            "Client closed connection, session ending"
                        );
                        state.dispatch.close_session(conn.session_id).await;
                        return;
                    }
                    None => break,
                    Some(Err(e)) => {
                        debug!(
                            target: "dc.transport",
                            session_id = %conn.session_id,
                            error = %e,
                            "Transport error"
                        );
                        break;
                    }
                }
            }
        }
    }

    info!(
        target: "dc.transport",
        session_id = %conn.session_id,
        "Connection lost, session entering grace window"
    );
    state.dispatch.connection_lost(conn.session_id).await;
}

impl ClientConnection {
    async fn handle_text(
        &mut self,
        socket: &mut WebSocket,
        text: &str,
    ) -> Result<(), axum::Error> {
        let message: ClientMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                debug!(
                    target: "dc.transport",
                    session_id = %self.session_id,
                    error = %e,
                    "Rejecting malformed control message"
                );
                return send_control(
                    socket,
                    &ServerMessage::Error {
                        code: 8,
                        message: "Malformed message".to_string(),
                    },
                )
                .await;
            }
        };

        match message {
            ClientMessage::JoinChannel { channel_id } => {
                match self
                    .dispatch
                    .join_channel(self.session_id.clone(), channel_id.clone())
                    .await
                {
                    Ok(handle) => {
                        self.channels.insert(channel_id.clone(), handle);
                        send_control(socket, &ServerMessage::JoinOk { channel_id }).await
                    }
                    Err(e) => send_control(socket, &error_message(&e)).await,
                }
            }

            ClientMessage::LeaveChannel { channel_id } => {
                match self
                    .dispatch
                    .leave_channel(self.session_id.clone(), channel_id.clone())
                    .await
                {
                    Ok(()) => {
                        self.channels.remove(&channel_id);
                        if self
                            .current_token
                            .as_ref()
                            .is_some_and(|t| t.channel_id == channel_id)
                        {
                            self.current_token = None;
                        }
                        send_control(socket, &ServerMessage::LeaveOk { channel_id }).await
                    }
                    Err(e) => send_control(socket, &error_message(&e)).await,
                }
            }

            ClientMessage::PttStart { channel_id } => {
                let Some(channel) = self.channels.get(&channel_id) else {
                    let e = DcError::NotAMember(channel_id);
                    return send_control(socket, &error_message(&e)).await;
                };
                match channel.request_transmission(self.session_id.clone()).await {
                    Ok(token) => {
                        self.current_token = Some(token.clone());
                        send_control(socket, &ServerMessage::PttGranted { token }).await
                    }
                    Err(DcError::ChannelBusy { current_holder }) => {
                        send_control(
                            socket,
                            &ServerMessage::PttDenied {
                                channel_id,
                                current_holder: Some(current_holder),
                            },
                        )
                        .await
                    }
                    Err(e) => send_control(socket, &error_message(&e)).await,
                }
            }

            ClientMessage::PttStop { token_id } => {
                let held = self
                    .current_token
                    .take_if(|t| t.token_id == token_id);
                match held {
                    Some(token) => {
                        if let Some(channel) = self.channels.get(&token.channel_id) {
                            if let Err(e) =
                                channel.release(token_id, ReleaseReason::ExplicitStop).await
                            {
                                warn!(
                                    target: "dc.transport",
                                    session_id = %self.session_id,
                                    error = %e,
                                    "Failed to release token"
                                );
                            }
                        }
                    }
                    None => {
                        // Stop raced a sweep or carries a superseded id.
                        debug!(
                            target: "dc.transport",
                            session_id = %self.session_id,
                            token_id = %token_id,
                            "Ignoring stop for non-held token"
                        );
                    }
                }
                Ok(())
            }

            ClientMessage::EmergencyRaise {
                channel_id,
                alert_type,
                description,
            } => {
                match self
                    .dispatch
                    .raise_alert(self.session_id.clone(), channel_id, alert_type, description)
                    .await
                {
                    // Delivery happens through the broadcast path.
                    Ok(_) => Ok(()),
                    Err(e) => send_control(socket, &error_message(&e)).await,
                }
            }

            ClientMessage::EmergencyAcknowledge { alert_id } => {
                match self
                    .dispatch
                    .acknowledge_alert(self.session_id.clone(), alert_id)
                    .await
                {
                    Ok(_) => Ok(()),
                    Err(e) => send_control(socket, &error_message(&e)).await,
                }
            }

            ClientMessage::EmergencyResolve { alert_id, notes } => {
                match self
                    .dispatch
                    .resolve_alert(self.session_id.clone(), alert_id, notes)
                    .await
                {
                    Ok(_) => Ok(()),
                    Err(e) => send_control(socket, &error_message(&e)).await,
                }
            }

            ClientMessage::HeartbeatPing => {
                let _ = self.dispatch.heartbeat(self.session_id.clone()).await;
                send_control(socket, &ServerMessage::HeartbeatPong).await
            }
        }
    }

    /// Route a binary audio frame to the owning channel actor.
    fn handle_binary(&self, data: &[u8]) {
        let mut buf = Bytes::copy_from_slice(data);
        let frame = match codec::decode_frame(&mut buf) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(
                    target: "dc.transport",
                    session_id = %self.session_id,
                    user_id = %self.user_id,
                    error = %e,
                    "Dropping undecodable frame"
                );
                return;
            }
        };

        match self.channels.get(&frame.channel_id) {
            Some(channel) => channel.relay_frame(self.session_id.clone(), frame),
            None => {
                debug!(
                    target: "dc.transport",
                    session_id = %self.session_id,
                    channel_id = %frame.channel_id,
                    "Dropping frame for channel this session has not joined"
                );
            }
        }
    }
}

async fn send_control(socket: &mut WebSocket, message: &ServerMessage) -> Result<(), axum::Error> {
    match serde_json::to_string(message) {
        Ok(text) => socket.send(Message::Text(text)).await,
        Err(e) => {
            // Serialization of our own types failing is a bug; log and
            // keep the connection alive.
            warn!(target: "dc.transport", error = %e, "Failed to serialize control message");
            Ok(())
        }
    }
}

fn error_message(error: &DcError) -> ServerMessage {
    ServerMessage::Error {
        code: error.error_code(),
        message: error.client_message(),
    }
}
