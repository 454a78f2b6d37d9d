//! Upstream realtime provider.
//!
//! The relay is the only component holding the provider credential. Every
//! call here injects it server-side, and nothing returned to callers carries
//! it (or the ephemeral client secret the provider may mint).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{StatusCode, header::CONTENT_TYPE};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{client::IntoClientRequest, http::HeaderValue},
};
use tracing::{debug, info, instrument, warn};
use tutorlink_core::{SessionError, protocol::IceCandidate};

use crate::config::Config;

pub type ProviderStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider credential is not configured")]
    MissingCredential,
    #[error("provider session {0} not found or expired")]
    SessionNotFound(String),
    #[error("provider rejected the offer: {0}")]
    Rejected(String),
    #[error("provider request failed: {0}")]
    Unavailable(String),
}

impl From<ProviderError> for SessionError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::MissingCredential => {
                SessionError::ProviderUnavailable("provider credential is not configured".into())
            }
            ProviderError::SessionNotFound(id) => SessionError::SessionNotFound(id),
            ProviderError::Rejected(detail) => SessionError::SignalingRejected(detail),
            ProviderError::Unavailable(detail) => SessionError::ProviderUnavailable(detail),
        }
    }
}

/// A freshly created provider session, stripped of any client secret.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSession {
    pub id: String,
    pub expires_at: Option<DateTime<Utc>>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RealtimeProvider: Send + Sync {
    async fn create_session(
        &self,
        instructions: Option<String>,
    ) -> Result<ProviderSession, ProviderError>;

    /// Exchanges the caller's offer for the provider's answer SDP.
    async fn exchange_sdp(
        &self,
        provider_session_id: &str,
        offer_sdp: &str,
    ) -> Result<String, ProviderError>;

    async fn add_ice_candidate(
        &self,
        provider_session_id: &str,
        candidate: &IceCandidate,
    ) -> Result<(), ProviderError>;

    /// Opens the provider's duplex audio socket for a session.
    async fn open_stream(&self, provider_session_id: &str) -> Result<ProviderStream, ProviderError>;
}

#[derive(Serialize)]
struct CreateProviderSession<'a> {
    model: &'a str,
    voice: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    instructions: Option<String>,
    modalities: [&'static str; 2],
}

/// Only the fields the relay passes on. Anything else in the provider's
/// response, including `client_secret`, is dropped at deserialization.
#[derive(Deserialize)]
struct ProviderSessionBody {
    id: String,
    #[serde(default)]
    expires_at: Option<i64>,
}

/// `RealtimeProvider` over the provider's session-addressed HTTP API.
#[derive(Clone)]
pub struct HttpRealtimeProvider {
    http: reqwest::Client,
    api_base: String,
    stream_base: String,
    api_key: Option<SecretString>,
    model: String,
    voice: String,
}

impl HttpRealtimeProvider {
    pub fn new(
        api_base: impl Into<String>,
        stream_base: impl Into<String>,
        api_key: Option<SecretString>,
        model: impl Into<String>,
        voice: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.into(),
            stream_base: stream_base.into(),
            api_key,
            model: model.into(),
            voice: voice.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.realtime_api_base.clone(),
            config.realtime_stream_base.clone(),
            config.openai_api_key.clone(),
            config.realtime_model.clone(),
            config.realtime_voice.clone(),
        )
    }

    fn api_key(&self) -> Result<&str, ProviderError> {
        self.api_key
            .as_ref()
            .map(|key| key.expose_secret())
            .ok_or(ProviderError::MissingCredential)
    }

    fn session_url(&self, provider_session_id: &str, suffix: &str) -> String {
        format!("{}/sessions/{}/{}", self.api_base, provider_session_id, suffix)
    }
}

/// Maps a non-success upstream status onto the relay's error classes.
fn map_status(
    status: StatusCode,
    body: &str,
    provider_session_id: Option<&str>,
    negotiating: bool,
) -> ProviderError {
    warn!(%status, body, "Provider returned an error");
    match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => {
            ProviderError::SessionNotFound(provider_session_id.unwrap_or_default().to_string())
        }
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY if negotiating => {
            ProviderError::Rejected(format!("provider returned {}", status))
        }
        _ => ProviderError::Unavailable(format!("provider returned {}", status)),
    }
}

fn transport_failure(err: reqwest::Error) -> ProviderError {
    warn!(error = %err, "Provider request failed");
    ProviderError::Unavailable("provider unreachable".to_string())
}

#[async_trait]
impl RealtimeProvider for HttpRealtimeProvider {
    #[instrument(skip_all, fields(model = %self.model))]
    async fn create_session(
        &self,
        instructions: Option<String>,
    ) -> Result<ProviderSession, ProviderError> {
        let api_key = self.api_key()?;
        let body = CreateProviderSession {
            model: &self.model,
            voice: &self.voice,
            instructions,
            modalities: ["audio", "text"],
        };

        let response = self
            .http
            .post(format!("{}/sessions", self.api_base))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(transport_failure)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(map_status(status, &text, None, false));
        }

        let session: ProviderSessionBody = response.json().await.map_err(|e| {
            warn!(error = %e, "Provider session response did not parse");
            ProviderError::Unavailable("unexpected provider response".to_string())
        })?;
        info!(provider_session_id = %session.id, "Provider session created");
        Ok(ProviderSession {
            id: session.id,
            expires_at: session
                .expires_at
                .and_then(|secs| DateTime::from_timestamp(secs, 0)),
        })
    }

    #[instrument(skip(self, offer_sdp))]
    async fn exchange_sdp(
        &self,
        provider_session_id: &str,
        offer_sdp: &str,
    ) -> Result<String, ProviderError> {
        let api_key = self.api_key()?;
        let response = self
            .http
            .post(self.session_url(provider_session_id, "sdp"))
            .bearer_auth(api_key)
            .header(CONTENT_TYPE, "application/sdp")
            .body(offer_sdp.to_string())
            .send()
            .await
            .map_err(transport_failure)?;

        let status = response.status();
        let text = response.text().await.map_err(transport_failure)?;
        if !status.is_success() {
            return Err(map_status(status, &text, Some(provider_session_id), true));
        }
        debug!(answer_len = text.len(), "Provider answered offer");
        Ok(text)
    }

    #[instrument(skip(self, candidate))]
    async fn add_ice_candidate(
        &self,
        provider_session_id: &str,
        candidate: &IceCandidate,
    ) -> Result<(), ProviderError> {
        let api_key = self.api_key()?;
        let response = self
            .http
            .post(self.session_url(provider_session_id, "candidates"))
            .bearer_auth(api_key)
            .json(candidate)
            .send()
            .await
            .map_err(transport_failure)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(map_status(status, &text, Some(provider_session_id), false));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn open_stream(&self, provider_session_id: &str) -> Result<ProviderStream, ProviderError> {
        let api_key = self.api_key()?;
        let url = format!("{}/sessions/{}/stream", self.stream_base, provider_session_id);
        let mut request = url
            .into_client_request()
            .map_err(|e| ProviderError::Unavailable(format!("invalid stream URL: {}", e)))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", api_key))
            .map_err(|_| ProviderError::Unavailable("invalid provider credential".to_string()))?;
        request.headers_mut().insert("Authorization", bearer);

        let (stream, _) = connect_async(request).await.map_err(|e| {
            warn!(error = %e, "Provider stream handshake failed");
            match e {
                tokio_tungstenite::tungstenite::Error::Http(response)
                    if matches!(response.status().as_u16(), 404 | 410) =>
                {
                    ProviderError::SessionNotFound(provider_session_id.to_string())
                }
                _ => ProviderError::Unavailable("provider stream unreachable".to_string()),
            }
        })?;
        info!("Provider stream connected");
        Ok(stream)
    }
}
