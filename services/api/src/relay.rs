//! Signaling relay.
//!
//! Three stateless forward-and-return operations against the provider. The
//! provider credential is injected by `RealtimeProvider` and never appears in
//! a response body.

use axum::{extract::State, http::HeaderMap, response::Json};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use tutorlink_core::{
    SessionError,
    protocol::{
        AckResponse, CreateSessionRequest, CreateSessionResponse, ErrorResponse,
        RelayIceCandidateRequest, RelayOfferRequest, RelayOfferResponse, TEMP_SESSION_PREFIX,
        is_plausible_sdp,
    },
};
use uuid::Uuid;

use crate::{
    handlers::{ApiError, ApiJson, user_id},
    models::NewSessionRecord,
    state::AppState,
};

pub const DEFAULT_TUTOR_INSTRUCTIONS: &str = "You are a patient, encouraging voice tutor. \
Keep answers short and conversational, check the learner's understanding often, and stay on topic.";

/// Instructions for the provider session: the caller's prompt when given,
/// otherwise the default tutor persona anchored to the topic.
pub fn session_instructions(topic: &str, system_prompt: Option<&str>) -> String {
    match system_prompt.map(str::trim).filter(|p| !p.is_empty()) {
        Some(prompt) => prompt.to_string(),
        None => format!("{}\n\nThe topic of this session is: {}", DEFAULT_TUTOR_INSTRUCTIONS, topic),
    }
}

fn required(value: Option<String>, field: &str) -> Result<String, ApiError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest(format!("{} is required", field)))
}

/// Create a provider session for a new conversation.
#[utoipa::path(
    post,
    path = "/realtime/session",
    request_body = CreateSessionRequest,
    responses(
        (status = 200, description = "Provider session created", body = CreateSessionResponse),
        (status = 400, description = "Missing topic", body = ErrorResponse),
        (status = 500, description = "Provider or credential error", body = ErrorResponse)
    ),
    params(
        ("x-user-id" = Option<String>, Header, description = "Persists a session record when present")
    )
)]
#[instrument(skip_all)]
pub async fn create_realtime_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ApiJson(payload): ApiJson<CreateSessionRequest>,
) -> Result<Json<CreateSessionResponse>, ApiError> {
    let topic = required(payload.topic, "topic")?;
    debug!(transport = ?payload.transport_method, "Creating realtime session");
    let instructions = session_instructions(&topic, payload.system_prompt.as_deref());

    let provider_session = state.provider.create_session(Some(instructions)).await?;

    let mut session_id = format!("{}{}", TEMP_SESSION_PREFIX, Uuid::new_v4());
    if let (Some(db), Some(user_id)) = (&state.db, user_id(&headers)) {
        let record = NewSessionRecord {
            user_id,
            topic: &topic,
            agent_mode: payload.agent_mode.as_deref(),
            provider_session_id: &provider_session.id,
        };
        match db.create_session(record).await {
            Ok(record) => session_id = record.id.to_string(),
            Err(e) => warn!(error = ?e, "Failed to persist session record; continuing with a temporary id"),
        }
    }

    info!(%session_id, provider_session_id = %provider_session.id, "Realtime session created");
    Ok(Json(CreateSessionResponse {
        session_id,
        provider_session_id: provider_session.id,
        expires_at: provider_session.expires_at,
    }))
}

/// Relay the caller's SDP offer and return the provider's answer.
#[utoipa::path(
    patch,
    path = "/realtime/session",
    request_body = RelayOfferRequest,
    responses(
        (status = 200, description = "Answer SDP", body = RelayOfferResponse),
        (status = 400, description = "Missing fields", body = ErrorResponse),
        (status = 500, description = "Relay or provider error", body = ErrorResponse)
    )
)]
#[instrument(skip_all)]
pub async fn relay_offer(
    State(state): State<Arc<AppState>>,
    ApiJson(payload): ApiJson<RelayOfferRequest>,
) -> Result<Json<RelayOfferResponse>, ApiError> {
    let provider_session_id = required(payload.provider_session_id, "providerSessionId")?;
    let sdp = required(payload.sdp, "sdp")?;
    if !is_plausible_sdp(&sdp) {
        return Err(SessionError::SignalingRejected("offer is not a session description".into()).into());
    }

    let answer = state.provider.exchange_sdp(&provider_session_id, &sdp).await?;
    info!(%provider_session_id, "Offer relayed");
    Ok(Json(RelayOfferResponse { sdp: answer }))
}

/// Relay one ICE candidate to the provider.
#[utoipa::path(
    put,
    path = "/realtime/session",
    request_body = RelayIceCandidateRequest,
    responses(
        (status = 200, description = "Candidate forwarded", body = AckResponse),
        (status = 400, description = "Missing fields", body = ErrorResponse),
        (status = 500, description = "Relay error", body = ErrorResponse)
    )
)]
#[instrument(skip_all)]
pub async fn relay_ice_candidate(
    State(state): State<Arc<AppState>>,
    ApiJson(payload): ApiJson<RelayIceCandidateRequest>,
) -> Result<Json<AckResponse>, ApiError> {
    let provider_session_id = required(payload.provider_session_id, "providerSessionId")?;
    let candidate = payload
        .candidate
        .filter(|c| !c.candidate.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("candidate is required".to_string()))?;

    state
        .provider
        .add_ice_candidate(&provider_session_id, &candidate)
        .await?;
    Ok(Json(AckResponse { success: true }))
}
