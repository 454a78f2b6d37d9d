//! The append-only conversation transcript.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum OriginRole {
    User,
    Agent,
    Supervisor,
    System,
}

impl fmt::Display for OriginRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OriginRole::User => write!(f, "user"),
            OriginRole::Agent => write!(f, "agent"),
            OriginRole::Supervisor => write!(f, "supervisor"),
            OriginRole::System => write!(f, "system"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptEntry {
    pub text: String,
    pub origin_role: OriginRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl TranscriptEntry {
    pub fn new(origin_role: OriginRole, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            origin_role,
            agent_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn from_agent(agent_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            agent_id: Some(agent_id.into()),
            ..Self::new(OriginRole::Agent, text)
        }
    }

    pub fn with_agent(mut self, agent_id: Option<String>) -> Self {
        self.agent_id = agent_id;
        self
    }
}

const TRANSCRIPT_CHANNEL_CAPACITY: usize = 256;

/// Shared, append-only transcript with a subscription stream.
///
/// Clones share the same log. A handoff coordinator hands one `Transcript`
/// to every session it creates so the conversation reads as one sequence.
#[derive(Clone)]
pub struct Transcript {
    entries: Arc<Mutex<Vec<TranscriptEntry>>>,
    tx: broadcast::Sender<TranscriptEntry>,
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new()
    }
}

impl Transcript {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(TRANSCRIPT_CHANNEL_CAPACITY);
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
            tx,
        }
    }

    pub fn append(&self, entry: TranscriptEntry) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.push(entry.clone());
        // Send while holding the lock so subscribers observe append order.
        let _ = self.tx.send(entry);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TranscriptEntry> {
        self.tx.subscribe()
    }

    pub fn entries(&self) -> Vec<TranscriptEntry> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn last(&self) -> Option<TranscriptEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last()
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
