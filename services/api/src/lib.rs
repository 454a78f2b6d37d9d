//! Tutorlink API Library Crate
//!
//! The backend half of tutorlink: the signaling relay that keeps the
//! provider credential server-side, the socket-audio stream proxy, the
//! supervisor completion endpoint, and optional persisted session records.
//! The binaries in `bin/` are thin wrappers around this library.

pub mod config;
pub mod db;
pub mod handlers;
pub mod models;
pub mod provider;
pub mod relay;
pub mod router;
pub mod state;
pub mod ws;

#[cfg(test)]
mod test_support;
