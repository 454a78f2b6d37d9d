//! Persisted session records.
//!
//! These map the optional `sessions` table with `sqlx` and double as the
//! response bodies of the record endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tutorlink_core::protocol::RecordStatus;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(sqlx::Type, Debug, Serialize, Deserialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "session_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SessionRecordStatus {
    Active,
    Ended,
}

impl From<RecordStatus> for SessionRecordStatus {
    fn from(status: RecordStatus) -> Self {
        match status {
            RecordStatus::Active => SessionRecordStatus::Active,
            RecordStatus::Ended => SessionRecordStatus::Ended,
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema, FromRow, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    #[schema(value_type = String, format = Uuid)]
    pub id: Uuid,
    pub user_id: String,
    pub topic: String,
    pub agent_mode: Option<String>,
    pub provider_session_id: String,
    #[schema(value_type = String, example = "active")]
    pub status: SessionRecordStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields written when the relay creates a record.
#[derive(Debug, Clone, Copy)]
pub struct NewSessionRecord<'a> {
    pub user_id: &'a str,
    pub topic: &'a str,
    pub agent_mode: Option<&'a str>,
    pub provider_session_id: &'a str,
}
