//! Dispatch Controller error types.
//!
//! Error types map to wire `error` codes for client responses. Internal
//! details are logged server-side but not exposed to clients.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use dispatch_protocol::types::AlertStatus;
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Dispatch Controller error type.
///
/// Maps to wire error codes:
/// - `ChannelBusy`: `CHANNEL_BUSY` (1) — recoverable, retry after free
/// - `InvalidTransition`: `INVALID_TRANSITION` (2) — caller misuse, not retried
/// - `DuplicateSession`: `DUPLICATE_SESSION` (3) — reason code on the displaced side
/// - `ChannelNotFound`, `SessionNotFound`, `AlertNotFound`: `NOT_FOUND` (4)
/// - `NotAMember`: `FORBIDDEN` (5)
/// - `StaleToken`: `STALE_TOKEN` (6) — logged server-side, dropped, never sent
/// - `TranscriptionUnavailable`: `TRANSCRIPTION_UNAVAILABLE` (7) — non-fatal
/// - `Config`, `Internal`: `INTERNAL_ERROR` (8)
#[derive(Debug, Error)]
pub enum DcError {
    /// Another session holds the channel's transmission token.
    #[error("Channel busy: held by {current_holder}")]
    ChannelBusy { current_holder: String },

    /// Alert state machine misuse; state is left unchanged.
    #[error("Invalid alert transition: cannot {attempted} while {current:?}")]
    InvalidTransition {
        current: AlertStatus,
        attempted: &'static str,
    },

    /// A second connection displaced an existing session for this identity.
    #[error("Duplicate session for identity: {0}")]
    DuplicateSession(String),

    /// Channel not in the configured catalog.
    #[error("Channel not found: {0}")]
    ChannelNotFound(String),

    /// Session not registered (or already closed).
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Operation requires channel membership.
    #[error("Not a member of channel: {0}")]
    NotAMember(String),

    /// Alert id unknown.
    #[error("Alert not found: {0}")]
    AlertNotFound(String),

    /// Transmission id unknown.
    #[error("Transmission not found: {0}")]
    TransmissionNotFound(String),

    /// A frame or stop arrived for a token that is no longer current.
    /// Benign race from network reordering; dropped, not propagated.
    #[error("Stale transmission token")]
    StaleToken,

    /// The transcription service failed; the transmission stays playable.
    #[error("Transcription unavailable: {0}")]
    TranscriptionUnavailable(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DcError {
    /// Returns the wire error code for this error.
    #[must_use]
    pub fn error_code(&self) -> i32 {
        match self {
            DcError::ChannelBusy { .. } => 1,
            DcError::InvalidTransition { .. } => 2,
            DcError::DuplicateSession(_) => 3,
            DcError::ChannelNotFound(_)
            | DcError::SessionNotFound(_)
            | DcError::AlertNotFound(_)
            | DcError::TransmissionNotFound(_) => 4,
            DcError::NotAMember(_) => 5,
            DcError::StaleToken => 6,
            DcError::TranscriptionUnavailable(_) => 7,
            DcError::Config(_) | DcError::Internal(_) => 8,
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            DcError::ChannelBusy { current_holder } => {
                format!("Channel busy: held by {current_holder}")
            }
            DcError::InvalidTransition { current, attempted } => {
                format!("Cannot {attempted} an alert that is {current:?}")
            }
            DcError::DuplicateSession(_) => {
                "Replaced by a newer connection for this identity".to_string()
            }
            DcError::ChannelNotFound(_) => "Channel not found".to_string(),
            DcError::SessionNotFound(_) => "Session not found".to_string(),
            DcError::NotAMember(_) => "Join the channel first".to_string(),
            DcError::AlertNotFound(_) => "Alert not found".to_string(),
            DcError::TransmissionNotFound(_) => "Transmission not found".to_string(),
            DcError::StaleToken => "Transmission already ended".to_string(),
            DcError::TranscriptionUnavailable(_) => "Transcription unavailable".to_string(),
            DcError::Config(_) | DcError::Internal(_) => "An internal error occurred".to_string(),
        }
    }

    /// True for races that are logged and dropped rather than reported.
    #[must_use]
    pub fn is_benign_race(&self) -> bool {
        matches!(self, DcError::StaleToken)
    }
}

impl IntoResponse for DcError {
    fn into_response(self) -> Response {
        let status = match self {
            DcError::ChannelBusy { .. }
            | DcError::InvalidTransition { .. }
            | DcError::DuplicateSession(_)
            | DcError::StaleToken => StatusCode::CONFLICT,
            DcError::ChannelNotFound(_)
            | DcError::SessionNotFound(_)
            | DcError::AlertNotFound(_)
            | DcError::TransmissionNotFound(_) => StatusCode::NOT_FOUND,
            DcError::NotAMember(_) => StatusCode::FORBIDDEN,
            DcError::TranscriptionUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            DcError::Config(_) | DcError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(target: "dc.http", error = %self, "Internal error serving request");
        }

        let body = Json(json!({
            "code": self.error_code(),
            "message": self.client_message(),
        }));
        (status, body).into_response()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(
            DcError::ChannelBusy {
                current_holder: "unit-12".to_string()
            }
            .error_code(),
            1
        );
        assert_eq!(
            DcError::InvalidTransition {
                current: AlertStatus::Resolved,
                attempted: "acknowledge"
            }
            .error_code(),
            2
        );
        assert_eq!(
            DcError::DuplicateSession("unit-12".to_string()).error_code(),
            3
        );
        assert_eq!(DcError::ChannelNotFound("ops-9".to_string()).error_code(), 4);
        assert_eq!(DcError::SessionNotFound("s-1".to_string()).error_code(), 4);
        assert_eq!(DcError::AlertNotFound("a-1".to_string()).error_code(), 4);
        assert_eq!(
            DcError::TransmissionNotFound("t-1".to_string()).error_code(),
            4
        );
        assert_eq!(DcError::NotAMember("ops-1".to_string()).error_code(), 5);
        assert_eq!(DcError::StaleToken.error_code(), 6);
        assert_eq!(
            DcError::TranscriptionUnavailable("outage".to_string()).error_code(),
            7
        );
        assert_eq!(DcError::Config("bad value".to_string()).error_code(), 8);
        assert_eq!(DcError::Internal("oops".to_string()).error_code(), 8);
    }

    #[test]
    fn test_client_messages_hide_internal_details() {
        let err = DcError::Internal("mailbox send failed at 10.0.0.4".to_string());
        assert!(!err.client_message().contains("10.0.0.4"));
        assert_eq!(err.client_message(), "An internal error occurred");

        let err = DcError::ChannelNotFound("secret-channel-name".to_string());
        assert!(!err.client_message().contains("secret-channel-name"));
    }

    #[test]
    fn test_channel_busy_names_holder() {
        let err = DcError::ChannelBusy {
            current_holder: "unit-12".to_string(),
        };
        assert!(err.client_message().contains("unit-12"));
    }

    #[test]
    fn test_stale_token_is_benign() {
        assert!(DcError::StaleToken.is_benign_race());
        assert!(!DcError::ChannelBusy {
            current_holder: "x".to_string()
        }
        .is_benign_race());
    }
}
