//! Socket-audio stream proxy.
//!
//! The client never connects to the provider directly. `/realtime/stream`
//! upgrades to a WebSocket and this module bridges it to the provider
//! socket, adding the credential on the upstream handshake.

mod proxy;

pub use proxy::{StreamParams, stream_handler};
