//! Runtime media capabilities.
//!
//! The host runtime (a browser binding, a native audio stack, a test fake)
//! supplies these traits. Whether it can do peer-to-peer media at all is what
//! the transport negotiator dispatches on.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;
use tutorlink_core::{SessionError, protocol::IceCandidate};

/// One chunk of mono audio.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// A captured microphone track.
pub trait MicrophoneTrack: Send + Sync {
    /// Hands out the captured frames. Returns `None` after the first call.
    fn take_frames(&mut self) -> Option<mpsc::Receiver<AudioFrame>>;
    /// Mutes or unmutes capture without releasing the device.
    fn set_enabled(&self, enabled: bool);
    /// Releases the device. Must be idempotent.
    fn stop(&mut self);
}

#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Fails with `DeviceAccessDenied` when permission is refused.
    async fn acquire_microphone(&self) -> Result<Box<dyn MicrophoneTrack>, SessionError>;
}

/// Plays audio received from the provider.
pub trait AudioSink: Send + Sync {
    fn play(&self, frame: AudioFrame);
}

/// Message channel negotiated alongside the peer media path.
pub struct DataChannel {
    pub incoming: mpsc::Receiver<String>,
    pub outgoing: mpsc::Sender<String>,
}

/// A single peer connection to the provider.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    fn attach_microphone(&mut self, frames: mpsc::Receiver<AudioFrame>);
    /// Locally gathered ICE candidates, in gathering order.
    fn take_local_candidates(&mut self) -> Option<mpsc::Receiver<IceCandidate>>;
    /// Frames of the inbound audio track once it arrives.
    fn take_remote_audio(&mut self) -> Option<mpsc::Receiver<AudioFrame>>;
    fn take_data_channel(&mut self) -> Option<DataChannel>;
    async fn create_offer(&mut self) -> Result<String, SessionError>;
    async fn apply_answer(&mut self, sdp: &str) -> Result<(), SessionError>;
    /// Closes the connection. Must be idempotent.
    fn close(&mut self);
}

#[async_trait]
pub trait PeerMediaApi: Send + Sync {
    async fn create_connection(&self) -> Result<Box<dyn PeerConnection>, SessionError>;
}

/// What the current runtime can do.
#[derive(Clone)]
pub struct RuntimeCapabilities {
    pub media_devices: Arc<dyn MediaDevices>,
    pub peer_media: Option<Arc<dyn PeerMediaApi>>,
}

impl RuntimeCapabilities {
    pub fn new(media_devices: Arc<dyn MediaDevices>) -> Self {
        Self {
            media_devices,
            peer_media: None,
        }
    }

    pub fn with_peer_media(mut self, peer_media: Arc<dyn PeerMediaApi>) -> Self {
        self.peer_media = Some(peer_media);
        self
    }

    pub fn supports_peer_media(&self) -> bool {
        self.peer_media.is_some()
    }
}

/// Owns a microphone track and stops it when dropped.
///
/// Every exit path (teardown, setup failure, cancelled setup) releases the
/// device through this guard.
pub struct MicrophoneGuard {
    track: Box<dyn MicrophoneTrack>,
}

impl MicrophoneGuard {
    pub fn new(track: Box<dyn MicrophoneTrack>) -> Self {
        Self { track }
    }

    pub fn take_frames(&mut self) -> Option<mpsc::Receiver<AudioFrame>> {
        self.track.take_frames()
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.track.set_enabled(enabled);
    }
}

impl Drop for MicrophoneGuard {
    fn drop(&mut self) {
        debug!("Releasing microphone");
        self.track.stop();
    }
}

/// Owns a peer connection and closes it when dropped.
pub struct PeerConnectionGuard {
    connection: Box<dyn PeerConnection>,
}

impl PeerConnectionGuard {
    pub fn new(connection: Box<dyn PeerConnection>) -> Self {
        Self { connection }
    }

    pub fn connection(&mut self) -> &mut dyn PeerConnection {
        self.connection.as_mut()
    }
}

impl Drop for PeerConnectionGuard {
    fn drop(&mut self) {
        debug!("Closing peer connection");
        self.connection.close();
    }
}
