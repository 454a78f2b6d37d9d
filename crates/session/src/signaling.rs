//! Client side of the signaling relay.
//!
//! All connection setup goes through the backend relay, which holds the
//! provider credential. Nothing in this module ever sees that credential.

use async_trait::async_trait;
use reqwest::{Method, StatusCode, Url};
use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, instrument, warn};
use tutorlink_core::{
    SessionError,
    protocol::{
        AckResponse, CreateSessionRequest, CreateSessionResponse, ErrorResponse, IceCandidate,
        RelayIceCandidateRequest, RelayOfferRequest, RelayOfferResponse,
    },
};

pub const RELAY_SESSION_PATH: &str = "realtime/session";
pub const RELAY_STREAM_PATH: &str = "realtime/stream";

#[async_trait]
pub trait SignalingClient: Send + Sync {
    async fn create_session(
        &self,
        request: &CreateSessionRequest,
    ) -> Result<CreateSessionResponse, SessionError>;

    /// Sends the local offer and returns the provider's answer SDP.
    async fn relay_offer(&self, provider_session_id: &str, sdp: &str) -> Result<String, SessionError>;

    async fn relay_ice_candidate(
        &self,
        provider_session_id: &str,
        candidate: &IceCandidate,
    ) -> Result<(), SessionError>;

    /// Socket URL of the relay's audio stream for a provider session.
    fn stream_url(&self, provider_session_id: &str) -> Result<String, SessionError>;
}

/// `SignalingClient` over the relay's HTTP surface.
#[derive(Clone)]
pub struct HttpSignalingClient {
    http: reqwest::Client,
    base_url: Url,
    user_id: Option<String>,
}

impl HttpSignalingClient {
    pub fn new(base_url: &str) -> Result<Self, SessionError> {
        // A trailing slash keeps `Url::join` from dropping the last path segment.
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        let base_url = Url::parse(&normalized)
            .map_err(|e| SessionError::InvalidInput(format!("invalid relay URL: {}", e)))?;
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
            user_id: None,
        })
    }

    /// Sends `x-user-id` so the relay can persist a session record.
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    fn endpoint(&self, path: &str) -> Result<Url, SessionError> {
        self.base_url
            .join(path)
            .map_err(|e| SessionError::InvalidInput(format!("invalid relay path: {}", e)))
    }

    async fn send<B: Serialize + Sync, R: DeserializeOwned>(
        &self,
        method: Method,
        body: &B,
    ) -> Result<R, SessionError> {
        let mut request = self
            .http
            .request(method, self.endpoint(RELAY_SESSION_PATH)?)
            .json(body);
        if let Some(user_id) = &self.user_id {
            request = request.header("x-user-id", user_id);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SessionError::ProviderUnavailable(format!("relay unreachable: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            return response.json::<R>().await.map_err(|e| {
                SessionError::ProviderUnavailable(format!("unexpected relay response: {}", e))
            });
        }

        let body = response.text().await.unwrap_or_default();
        Err(map_relay_error(status, &body))
    }
}

/// Turns a relay error response back into the session error taxonomy.
pub(crate) fn map_relay_error(status: StatusCode, body: &str) -> SessionError {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(ErrorResponse {
            code: Some(code),
            message,
        }) => SessionError::from_code(code, message),
        Ok(ErrorResponse { message, .. }) if status == StatusCode::BAD_REQUEST => {
            SessionError::InvalidInput(message)
        }
        _ => {
            warn!(%status, body, "Relay returned an unrecognized error");
            if status == StatusCode::BAD_REQUEST {
                SessionError::InvalidInput(format!("relay rejected the request ({})", status))
            } else {
                SessionError::ProviderUnavailable(format!("relay error ({})", status))
            }
        }
    }
}

#[async_trait]
impl SignalingClient for HttpSignalingClient {
    #[instrument(skip_all)]
    async fn create_session(
        &self,
        request: &CreateSessionRequest,
    ) -> Result<CreateSessionResponse, SessionError> {
        let response: CreateSessionResponse = self.send(Method::POST, request).await?;
        debug!(provider_session_id = %response.provider_session_id, "Relay created provider session");
        Ok(response)
    }

    #[instrument(skip(self, sdp))]
    async fn relay_offer(&self, provider_session_id: &str, sdp: &str) -> Result<String, SessionError> {
        let body = RelayOfferRequest {
            provider_session_id: Some(provider_session_id.to_string()),
            sdp: Some(sdp.to_string()),
        };
        let response: RelayOfferResponse = self.send(Method::PATCH, &body).await?;
        Ok(response.sdp)
    }

    #[instrument(skip(self, candidate))]
    async fn relay_ice_candidate(
        &self,
        provider_session_id: &str,
        candidate: &IceCandidate,
    ) -> Result<(), SessionError> {
        let body = RelayIceCandidateRequest {
            provider_session_id: Some(provider_session_id.to_string()),
            candidate: Some(candidate.clone()),
        };
        let _: AckResponse = self.send(Method::PUT, &body).await?;
        Ok(())
    }

    fn stream_url(&self, provider_session_id: &str) -> Result<String, SessionError> {
        let mut url = self.endpoint(RELAY_STREAM_PATH)?;
        let scheme = match url.scheme() {
            "https" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme)
            .map_err(|_| SessionError::InvalidInput("relay URL cannot carry a socket".to_string()))?;
        url.query_pairs_mut()
            .append_pair("providerSessionId", provider_session_id);
        Ok(url.to_string())
    }
}
