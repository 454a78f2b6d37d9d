//! Transport negotiation.
//!
//! A session talks to the provider over exactly one of two transports:
//!
//! - `peer`: a peer-to-peer media path negotiated through the relay.
//! - `socket`: a duplex message socket carrying PCM frames and JSON events.
//!
//! The negotiator picks one, once, from the runtime's capabilities and hands
//! back a `TransportHandle` that looks the same whichever was chosen.

mod peer;
mod socket;

use crate::{
    media::{AudioSink, RuntimeCapabilities},
    signaling::SignalingClient,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument};
use tutorlink_core::{
    SessionError,
    events::{ClientEvent, ProviderEvent},
    protocol::TransportMethod,
};

/// What a live transport reports to its session.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Provider(ProviderEvent),
    /// The transport is gone; the session must end.
    Closed { reason: String },
}

#[derive(Clone)]
pub struct TransportNegotiator {
    capabilities: RuntimeCapabilities,
    signaling: Arc<dyn SignalingClient>,
}

impl TransportNegotiator {
    pub fn new(capabilities: RuntimeCapabilities, signaling: Arc<dyn SignalingClient>) -> Self {
        Self {
            capabilities,
            signaling,
        }
    }

    /// Prefers peer media whenever the runtime offers it.
    pub fn select(&self) -> TransportMethod {
        if self.capabilities.supports_peer_media() {
            TransportMethod::PeerMedia
        } else {
            TransportMethod::SocketAudio
        }
    }

    /// Establishes the media path for `provider_session_id`.
    ///
    /// On error every partially acquired resource has already been released.
    #[instrument(skip(self, sink, events), fields(transport = %method))]
    pub async fn connect(
        &self,
        method: TransportMethod,
        provider_session_id: &str,
        sink: Arc<dyn AudioSink>,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<TransportHandle, SessionError> {
        let inner = match method {
            TransportMethod::PeerMedia => {
                let api = self.capabilities.peer_media.clone().ok_or_else(|| {
                    SessionError::TransportError("runtime has no peer media support".to_string())
                })?;
                ActiveTransport::Peer(
                    peer::connect(
                        api,
                        self.capabilities.media_devices.clone(),
                        self.signaling.clone(),
                        provider_session_id,
                        sink,
                        events,
                    )
                    .await?,
                )
            }
            TransportMethod::SocketAudio => ActiveTransport::Socket(
                socket::connect(
                    self.capabilities.media_devices.clone(),
                    self.signaling.as_ref(),
                    provider_session_id,
                    sink,
                    events,
                )
                .await?,
            ),
        };
        info!("Transport established");
        Ok(TransportHandle { method, inner })
    }
}

enum ActiveTransport {
    Peer(peer::PeerTransport),
    Socket(socket::SocketTransport),
}

/// A connected transport. Dropping it releases the microphone and closes the
/// connection.
pub struct TransportHandle {
    method: TransportMethod,
    inner: ActiveTransport,
}

impl TransportHandle {
    pub fn method(&self) -> TransportMethod {
        self.method
    }

    /// Gates whether captured audio reaches the provider.
    pub fn set_capture_enabled(&self, enabled: bool) {
        match &self.inner {
            ActiveTransport::Peer(t) => t.set_capture_enabled(enabled),
            ActiveTransport::Socket(t) => t.set_capture_enabled(enabled),
        }
    }

    pub async fn send_event(&self, event: &ClientEvent) -> Result<(), SessionError> {
        let outgoing = match &self.inner {
            ActiveTransport::Peer(t) => t.outgoing(),
            ActiveTransport::Socket(t) => t.outgoing(),
        };
        outgoing
            .send(event.to_json())
            .await
            .map_err(|_| SessionError::TransportError("transport is closed".to_string()))
    }

    pub async fn close(self) {
        debug!(transport = %self.method, "Closing transport");
        match self.inner {
            ActiveTransport::Peer(t) => t.close(),
            ActiveTransport::Socket(t) => t.close().await,
        }
    }
}

/// Parses a provider text message and forwards it to the session.
///
/// Returns `false` once the session side has gone away.
pub(crate) async fn forward_text_event(text: &str, events: &mpsc::Sender<TransportEvent>) -> bool {
    match ProviderEvent::parse(text) {
        Ok(ProviderEvent::Unknown) => true,
        Ok(event) => events.send(TransportEvent::Provider(event)).await.is_ok(),
        Err(e) => {
            debug!(error = %e, "Ignoring unparseable provider message");
            true
        }
    }
}
