//! Axum Router Configuration
//!
//! The signaling relay, the stream proxy, session records, the supervisor
//! endpoint, and the OpenAPI documentation.

use crate::{
    handlers,
    models::{SessionRecord, SessionRecordStatus},
    relay,
    state::AppState,
    ws::stream_handler,
};

use axum::{
    Router,
    routing::{get, patch, post},
};
use std::sync::Arc;
use tutorlink_core::{
    ErrorCode,
    protocol::{
        AckResponse, CreateSessionRequest, CreateSessionResponse, ErrorResponse, IceCandidate,
        RecordStatus, RelayIceCandidateRequest, RelayOfferRequest, RelayOfferResponse,
        SupervisorRequest, SupervisorResponse, TransportMethod, UpdateRecordStatusRequest,
    },
    transcript::{OriginRole, TranscriptEntry},
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        relay::create_realtime_session,
        relay::relay_offer,
        relay::relay_ice_candidate,
        handlers::list_sessions,
        handlers::get_session,
        handlers::update_session_status,
        handlers::supervisor_respond,
    ),
    components(
        schemas(
            CreateSessionRequest, CreateSessionResponse, RelayOfferRequest, RelayOfferResponse,
            RelayIceCandidateRequest, IceCandidate, AckResponse, ErrorResponse, ErrorCode,
            TransportMethod, SessionRecord, SessionRecordStatus, RecordStatus,
            UpdateRecordStatusRequest, SupervisorRequest, SupervisorResponse, TranscriptEntry,
            OriginRole
        )
    ),
    tags(
        (name = "tutorlink", description = "Signaling relay and session records for realtime voice tutoring")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .route(
            "/realtime/session",
            post(relay::create_realtime_session)
                .patch(relay::relay_offer)
                .put(relay::relay_ice_candidate),
        )
        .route("/realtime/stream", get(stream_handler))
        .route("/sessions", get(handlers::list_sessions))
        .route("/sessions/{id}", get(handlers::get_session))
        .route(
            "/sessions/{id}/status",
            patch(handlers::update_session_status),
        )
        .route("/supervisor/respond", post(handlers::supervisor_respond))
        .with_state(app_state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}
