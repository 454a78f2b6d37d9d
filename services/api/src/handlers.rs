//! Axum Handlers for session records and supervisor turns.
//!
//! The signaling relay lives in `relay`; this module holds the shared
//! `ApiError` mapping and the endpoints that sit beside it.

use axum::{
    extract::{FromRequest, Path, Request, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;
use tracing::{error, instrument, warn};
use tutorlink_core::{
    ErrorCode, SessionError,
    protocol::{ErrorResponse, SupervisorRequest, SupervisorResponse, UpdateRecordStatusRequest},
};
use uuid::Uuid;

use crate::{db::Db, models::SessionRecord, provider::ProviderError, state::AppState};

pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    /// A failure in the session error taxonomy.
    Session(SessionError),
    PersistenceDisabled,
    InternalServerError(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    message,
                    code: Some(ErrorCode::InvalidInput),
                }),
            )
                .into_response(),
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(ErrorResponse { message, code: None })).into_response()
            }
            ApiError::Session(err) => {
                let status = match err {
                    SessionError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                warn!(code = %err.code(), error = %err, "Request failed");
                let body = ErrorResponse {
                    message: err.user_message(),
                    code: Some(err.code()),
                };
                (status, Json(body)).into_response()
            }
            ApiError::PersistenceDisabled => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorResponse {
                    message: "Session records are not enabled on this server.".to_string(),
                    code: None,
                }),
            )
                .into_response(),
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                let message = "An internal server error occurred.".to_string();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse { message, code: None }),
                )
                    .into_response()
            }
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::InternalServerError(err)
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        Self::Session(err)
    }
}

impl From<ProviderError> for ApiError {
    fn from(err: ProviderError) -> Self {
        Self::Session(err.into())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

/// `Json` whose rejections (bad syntax, wrong types, missing content type)
/// come back as an `ErrorResponse` with `invalid_input`.
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(Self(value))
    }
}

/// Reads the caller's user id, if the host application sent one.
pub fn user_id(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn require_user_id(headers: &HeaderMap) -> Result<&str, ApiError> {
    user_id(headers).ok_or_else(|| ApiError::BadRequest("x-user-id header is required".to_string()))
}

fn require_db(state: &AppState) -> Result<&Arc<Db>, ApiError> {
    state.db.as_ref().ok_or(ApiError::PersistenceDisabled)
}

/// List all session records for a user.
#[utoipa::path(
    get,
    path = "/sessions",
    responses(
        (status = 200, description = "List of session records", body = [SessionRecord]),
        (status = 400, description = "Missing user id", body = ErrorResponse),
        (status = 503, description = "Persistence is not configured", body = ErrorResponse)
    ),
    params(
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<SessionRecord>>, ApiError> {
    let db = require_db(&state)?;
    let user_id = require_user_id(&headers)?;
    let sessions = db.list_sessions(user_id).await?;
    Ok(Json(sessions))
}

/// Get a specific session record by its ID.
#[utoipa::path(
    get,
    path = "/sessions/{id}",
    responses(
        (status = 200, description = "Session record", body = SessionRecord),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 503, description = "Persistence is not configured", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session record ID"),
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionRecord>, ApiError> {
    let db = require_db(&state)?;
    let user_id = require_user_id(&headers)?;

    let session = db
        .get_session(id, user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Session with id '{}' not found", id)))?;

    Ok(Json(session))
}

/// Update the status of a session record.
#[utoipa::path(
    patch,
    path = "/sessions/{id}/status",
    request_body = UpdateRecordStatusRequest,
    responses(
        (status = 200, description = "Session status updated", body = SessionRecord),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 503, description = "Persistence is not configured", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session record ID"),
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
#[instrument(skip(state, headers, payload))]
pub async fn update_session_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    ApiJson(payload): ApiJson<UpdateRecordStatusRequest>,
) -> Result<Json<SessionRecord>, ApiError> {
    let db = require_db(&state)?;
    let user_id = require_user_id(&headers)?;

    let session = db
        .update_session_status(id, user_id, payload.status.into())
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Session with id '{}' not found", id)))?;

    Ok(Json(session))
}

/// Answer a turn the live session delegated to the supervisor model.
#[utoipa::path(
    post,
    path = "/supervisor/respond",
    request_body = SupervisorRequest,
    responses(
        (status = 200, description = "Supervisor answer", body = SupervisorResponse),
        (status = 400, description = "Empty request", body = ErrorResponse),
        (status = 500, description = "Supervisor model failed", body = ErrorResponse)
    )
)]
#[instrument(skip_all)]
pub async fn supervisor_respond(
    State(state): State<Arc<AppState>>,
    ApiJson(payload): ApiJson<SupervisorRequest>,
) -> Result<Json<SupervisorResponse>, ApiError> {
    if payload.request.trim().is_empty() {
        return Err(ApiError::BadRequest("request must not be empty".to_string()));
    }

    let text = state
        .supervisor
        .respond(&payload.transcript, &payload.request)
        .await
        .map_err(|e| {
            warn!(error = ?e, "Supervisor model failed");
            SessionError::ProviderUnavailable("supervisor model failed".to_string())
        })?;

    Ok(Json(SupervisorResponse { text }))
}
