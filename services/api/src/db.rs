//! Data Access Layer
//!
//! Optional Postgres storage for session records. The relay works without
//! it; when configured, it is only ever written opportunistically.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{NewSessionRecord, SessionRecord, SessionRecordStatus};

/// A wrapper around the `PgPool` to provide a clear data access interface.
#[derive(Clone)]
pub struct Db {
    pool: PgPool,
}

impl Db {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs all pending `sqlx` migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub async fn create_session(&self, record: NewSessionRecord<'_>) -> Result<SessionRecord> {
        let session = sqlx::query_as::<_, SessionRecord>(
            r#"
            INSERT INTO sessions (user_id, topic, agent_mode, provider_session_id)
            VALUES ($1, $2, $3, $4)
            RETURNING id, user_id, topic, agent_mode, provider_session_id, status, created_at, updated_at
            "#,
        )
        .bind(record.user_id)
        .bind(record.topic)
        .bind(record.agent_mode)
        .bind(record.provider_session_id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to insert session record")?;
        Ok(session)
    }

    /// Retrieves a single session by its ID, scoped to a specific user.
    pub async fn get_session(&self, session_id: Uuid, user_id: &str) -> Result<Option<SessionRecord>> {
        let session = sqlx::query_as::<_, SessionRecord>(
            r#"
            SELECT id, user_id, topic, agent_mode, provider_session_id, status, created_at, updated_at
            FROM sessions
            WHERE id = $1 AND user_id = $2
            "#,
        )
        .bind(session_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to load session record")?;
        Ok(session)
    }

    /// Lists all sessions for a given user, ordered by most recent.
    pub async fn list_sessions(&self, user_id: &str) -> Result<Vec<SessionRecord>> {
        let sessions = sqlx::query_as::<_, SessionRecord>(
            r#"
            SELECT id, user_id, topic, agent_mode, provider_session_id, status, created_at, updated_at
            FROM sessions
            WHERE user_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list session records")?;
        Ok(sessions)
    }

    /// Returns `None` when no record with that id belongs to the user.
    pub async fn update_session_status(
        &self,
        session_id: Uuid,
        user_id: &str,
        status: SessionRecordStatus,
    ) -> Result<Option<SessionRecord>> {
        let session = sqlx::query_as::<_, SessionRecord>(
            r#"
            UPDATE sessions
            SET status = $1, updated_at = now()
            WHERE id = $2 AND user_id = $3
            RETURNING id, user_id, topic, agent_mode, provider_session_id, status, created_at, updated_at
            "#,
        )
        .bind(status)
        .bind(session_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to update session record")?;
        Ok(session)
    }
}
