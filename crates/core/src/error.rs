//! Error taxonomy for realtime sessions.
//!
//! Every failure a session can surface maps onto one `SessionError` variant.
//! The UI only ever sees an `ErrorReport`: a stable code plus a message that
//! is safe to display. Raw provider payloads stay in the logs.

use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),
    #[error("provider session not found: {0}")]
    SessionNotFound(String),
    #[error("signaling rejected: {0}")]
    SignalingRejected(String),
    #[error("microphone access denied: {0}")]
    DeviceAccessDenied(String),
    #[error("invalid handoff: {0}")]
    InvalidHandoff(String),
    #[error("a handoff is already in progress")]
    HandoffInProgress,
    #[error("transport error: {0}")]
    TransportError(String),
}

/// Stable, machine-readable identifier for each error class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidInput,
    ProviderUnavailable,
    SessionNotFound,
    SignalingRejected,
    DeviceAccessDenied,
    InvalidHandoff,
    HandoffInProgress,
    TransportError,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::InvalidInput => "invalid_input",
            ErrorCode::ProviderUnavailable => "provider_unavailable",
            ErrorCode::SessionNotFound => "session_not_found",
            ErrorCode::SignalingRejected => "signaling_rejected",
            ErrorCode::DeviceAccessDenied => "device_access_denied",
            ErrorCode::InvalidHandoff => "invalid_handoff",
            ErrorCode::HandoffInProgress => "handoff_in_progress",
            ErrorCode::TransportError => "transport_error",
        };
        f.write_str(s)
    }
}

impl SessionError {
    pub fn code(&self) -> ErrorCode {
        match self {
            SessionError::InvalidInput(_) => ErrorCode::InvalidInput,
            SessionError::ProviderUnavailable(_) => ErrorCode::ProviderUnavailable,
            SessionError::SessionNotFound(_) => ErrorCode::SessionNotFound,
            SessionError::SignalingRejected(_) => ErrorCode::SignalingRejected,
            SessionError::DeviceAccessDenied(_) => ErrorCode::DeviceAccessDenied,
            SessionError::InvalidHandoff(_) => ErrorCode::InvalidHandoff,
            SessionError::HandoffInProgress => ErrorCode::HandoffInProgress,
            SessionError::TransportError(_) => ErrorCode::TransportError,
        }
    }

    /// Rebuilds an error from a code and detail received over the wire.
    pub fn from_code(code: ErrorCode, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        match code {
            ErrorCode::InvalidInput => SessionError::InvalidInput(detail),
            ErrorCode::ProviderUnavailable => SessionError::ProviderUnavailable(detail),
            ErrorCode::SessionNotFound => SessionError::SessionNotFound(detail),
            ErrorCode::SignalingRejected => SessionError::SignalingRejected(detail),
            ErrorCode::DeviceAccessDenied => SessionError::DeviceAccessDenied(detail),
            ErrorCode::InvalidHandoff => SessionError::InvalidHandoff(detail),
            ErrorCode::HandoffInProgress => SessionError::HandoffInProgress,
            ErrorCode::TransportError => SessionError::TransportError(detail),
        }
    }

    /// Whether the UI should offer the user a retry affordance.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SessionError::ProviderUnavailable(_)
                | SessionError::SignalingRejected(_)
                | SessionError::SessionNotFound(_)
                | SessionError::TransportError(_)
        )
    }

    /// A message that is safe to show to the user.
    pub fn user_message(&self) -> String {
        match self {
            SessionError::InvalidInput(detail) => format!("Please check your request: {detail}"),
            SessionError::ProviderUnavailable(_) => {
                "The voice service is unavailable right now. Please try again.".to_string()
            }
            SessionError::SessionNotFound(_) => {
                "The voice session expired before it could connect. Please start a new one."
                    .to_string()
            }
            SessionError::SignalingRejected(_) => {
                "The voice connection could not be negotiated. Please try again.".to_string()
            }
            SessionError::DeviceAccessDenied(_) => {
                "Microphone access was denied. Allow microphone access in your browser settings and start again."
                    .to_string()
            }
            SessionError::InvalidHandoff(_) => {
                "That transfer is not available from the current agent.".to_string()
            }
            SessionError::HandoffInProgress => {
                "Please wait while you are connected to the next agent.".to_string()
            }
            SessionError::TransportError(_) => {
                "The voice connection was lost. Reconnect to continue.".to_string()
            }
        }
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            code: self.code(),
            message: self.user_message(),
        }
    }
}

/// The single value the UI layer receives for any failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub code: ErrorCode,
    pub message: String,
}
