//! Client-side orchestration of realtime tutoring conversations.
//!
//! - `signaling`: talks to the backend relay; the only path to the provider.
//! - `media`: the runtime's microphone, playback and peer-media capabilities.
//! - `transport`: picks and drives the peer-media or socket-audio transport.
//! - `lifecycle`: one session's state machine and its event streams.
//! - `handoff`: restarts the session under another agent persona on transfer.
//! - `supervisor`: delegates flagged turns to a slower text model.
//! - `recorder`: best-effort updates of the host application's session record.

pub mod audio;
pub mod handoff;
pub mod lifecycle;
pub mod media;
pub mod recorder;
pub mod signaling;
pub mod supervisor;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

pub use handoff::HandoffCoordinator;
pub use lifecycle::{Session, SessionManager, SessionOptions, SessionStatus};
pub use supervisor::SupervisorDelegation;
pub use transport::{TransportHandle, TransportNegotiator};
