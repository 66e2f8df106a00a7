//! Error types for the invitation system.

use thiserror::Error;

use super::SignalKind;

/// Result type alias for invitation operations
pub type InvitationResult<T> = Result<T, InvitationError>;

/// Main error type for the invitation system
#[derive(Debug, Error)]
pub enum InvitationError {
    #[error("Chat API error: {message}")]
    ChatApi { message: String },

    #[error("Invalid chat API response: {message}")]
    InvalidResponse { message: String },

    #[error("Invalid signal payload: {message}")]
    InvalidPayload { message: String },

    #[error("Failed to send {kind} signal: {reason}")]
    SignalSend { kind: SignalKind, reason: String },

    #[error("Unknown connection: {connection_id}")]
    UnknownConnection { connection_id: String },

    #[error("Invitation not found: {id}")]
    InvitationNotFound { id: String },

    #[error("Operation requires an {expected} invitation")]
    InvalidDirection { expected: &'static str },

    #[error("Invitation has no session id yet")]
    MissingSessionId,

    #[error("Signaling session is not ready")]
    SessionNotReady,

    #[error("No reply to {request}")]
    NoReply { request: &'static str },

    #[error("Coordinator has stopped")]
    CoordinatorStopped,
}

impl InvitationError {
    /// Create a chat API error
    pub fn chat_api(message: impl Into<String>) -> Self {
        Self::ChatApi {
            message: message.into(),
        }
    }

    /// Create an invalid response error
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }

    /// Create an invalid payload error
    pub fn invalid_payload(message: impl Into<String>) -> Self {
        Self::InvalidPayload {
            message: message.into(),
        }
    }

    /// Create a signal send error
    pub fn signal_send(kind: SignalKind, reason: impl Into<String>) -> Self {
        Self::SignalSend {
            kind,
            reason: reason.into(),
        }
    }

    /// Create an unknown connection error
    pub fn unknown_connection(connection_id: impl Into<String>) -> Self {
        Self::UnknownConnection {
            connection_id: connection_id.into(),
        }
    }

    /// Create a not found error for invitations
    pub fn invitation_not_found(id: impl ToString) -> Self {
        Self::InvitationNotFound { id: id.to_string() }
    }
}

impl From<reqwest::Error> for InvitationError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::InvalidResponse {
                message: err.to_string(),
            }
        } else {
            Self::ChatApi {
                message: err.to_string(),
            }
        }
    }
}

impl From<serde_json::Error> for InvitationError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidPayload {
            message: format!("JSON error: {}", err),
        }
    }
}
