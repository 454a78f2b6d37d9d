//! Wire format of the signaling relay's HTTP surface.
//!
//! Request fields the relay must validate itself are `Option`s so a missing
//! field becomes a 400 with our own error body rather than an extractor
//! rejection.

use crate::{error::ErrorCode, transcript::TranscriptEntry};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Which media path a session uses. Chosen once per underlying connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum TransportMethod {
    PeerMedia,
    SocketAudio,
}

impl std::fmt::Display for TransportMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportMethod::PeerMedia => write!(f, "peer-media"),
            TransportMethod::SocketAudio => write!(f, "socket-audio"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    #[schema(example = "Thermodynamics")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport_method: Option<TransportMethod>,
    /// Agent persona or interview mode, recorded with the persisted session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_mode: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    /// Host-application record id, `temp-` prefixed when nothing was persisted.
    pub session_id: String,
    pub provider_session_id: String,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RelayOfferRequest {
    pub provider_session_id: Option<String>,
    pub sdp: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RelayOfferResponse {
    pub sdp: String,
}

/// An ICE candidate as produced by the local peer connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RelayIceCandidateRequest {
    pub provider_session_id: Option<String>,
    pub candidate: Option<IceCandidate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AckResponse {
    pub success: bool,
}

/// Error body returned by every relay endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
}

/// Lifecycle of the host application's persisted session record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Active,
    Ended,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpdateRecordStatusRequest {
    pub status: RecordStatus,
}

/// A turn delegated to the supervisor model, answered server-side.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SupervisorRequest {
    #[serde(default)]
    pub transcript: Vec<TranscriptEntry>,
    pub request: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SupervisorResponse {
    pub text: String,
}

/// Prefix of session ids that have no persisted record behind them.
pub const TEMP_SESSION_PREFIX: &str = "temp-";

pub fn is_temporary_session_id(id: &str) -> bool {
    id.starts_with(TEMP_SESSION_PREFIX)
}

/// Returns true when `sdp` looks like a session description at all.
pub fn is_plausible_sdp(sdp: &str) -> bool {
    sdp.trim_start().starts_with("v=0")
}
