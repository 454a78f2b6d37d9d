//! Shared domain types for tutorlink realtime sessions.
//!
//! Both the client-side orchestrator and the signaling relay depend on this
//! crate, so everything that crosses the wire between them lives here.

pub mod agent;
pub mod error;
pub mod events;
pub mod llm_client;
pub mod protocol;
pub mod transcript;

pub use error::{ErrorCode, ErrorReport, SessionError};
