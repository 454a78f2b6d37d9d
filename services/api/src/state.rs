//! Shared Application State

use crate::{db::Db, provider::RealtimeProvider};
use std::sync::Arc;
use tutorlink_core::llm_client::SupervisorModel;

/// Created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub provider: Arc<dyn RealtimeProvider>,
    pub supervisor: Arc<dyn SupervisorModel>,
    /// `None` when no database is configured; records are then never written.
    pub db: Option<Arc<Db>>,
}

impl AppState {
    pub fn new(provider: Arc<dyn RealtimeProvider>, supervisor: Arc<dyn SupervisorModel>) -> Self {
        Self {
            provider,
            supervisor,
            db: None,
        }
    }

    pub fn with_db(mut self, db: Arc<Db>) -> Self {
        self.db = Some(db);
        self
    }
}
