//! Best-effort updates of the host application's persisted session record.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::Url;
use tutorlink_core::{
    SessionError,
    protocol::{RecordStatus, UpdateRecordStatusRequest},
};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionRecorder: Send + Sync {
    async fn mark_status(&self, record_id: &str, status: RecordStatus) -> Result<()>;
}

/// Updates records through the relay's `/sessions/{id}/status` endpoint.
#[derive(Clone)]
pub struct HttpSessionRecorder {
    http: reqwest::Client,
    base_url: Url,
    user_id: Option<String>,
}

impl HttpSessionRecorder {
    pub fn new(base_url: &str) -> Result<Self, SessionError> {
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

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

#[async_trait]
impl SessionRecorder for HttpSessionRecorder {
    async fn mark_status(&self, record_id: &str, status: RecordStatus) -> Result<()> {
        let url = self
            .base_url
            .join(&format!("sessions/{}/status", record_id))
            .context("Failed to build record URL")?;
        let mut request = self
            .http
            .patch(url)
            .json(&UpdateRecordStatusRequest { status });
        if let Some(user_id) = &self.user_id {
            request = request.header("x-user-id", user_id);
        }

        let response = request
            .send()
            .await
            .context("Failed to reach the session record endpoint")?;
        if !response.status().is_success() {
            bail!("session record update returned {}", response.status());
        }
        Ok(())
    }
}
