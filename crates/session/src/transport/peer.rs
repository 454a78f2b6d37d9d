//! Peer-media transport: offer/answer and ICE through the relay, audio and
//! events directly between the runtime and the provider.

use super::{TransportEvent, forward_text_event};
use crate::{
    media::{
        AudioFrame, AudioSink, DataChannel, MediaDevices, MicrophoneGuard, PeerConnectionGuard,
        PeerMediaApi,
    },
    signaling::SignalingClient,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};
use tutorlink_core::{SessionError, protocol::IceCandidate};

pub(crate) struct PeerTransport {
    outgoing: mpsc::Sender<String>,
    // Fields drop in order: background tasks stop before the connection
    // closes and the microphone is released.
    _tasks: DropGuard,
    _connection: PeerConnectionGuard,
    microphone: MicrophoneGuard,
}

impl PeerTransport {
    pub(crate) fn set_capture_enabled(&self, enabled: bool) {
        self.microphone.set_enabled(enabled);
    }

    pub(crate) fn outgoing(&self) -> &mpsc::Sender<String> {
        &self.outgoing
    }

    pub(crate) fn close(self) {
        drop(self);
    }
}

pub(crate) async fn connect(
    api: Arc<dyn PeerMediaApi>,
    devices: Arc<dyn MediaDevices>,
    signaling: Arc<dyn SignalingClient>,
    provider_session_id: &str,
    sink: Arc<dyn AudioSink>,
    events: mpsc::Sender<TransportEvent>,
) -> Result<PeerTransport, SessionError> {
    let mut microphone = MicrophoneGuard::new(devices.acquire_microphone().await?);
    let mut connection = PeerConnectionGuard::new(api.create_connection().await?);
    let token = CancellationToken::new();
    let tasks = token.clone().drop_guard();

    if let Some(frames) = microphone.take_frames() {
        connection.connection().attach_microphone(frames);
    }
    let DataChannel { incoming, outgoing } = connection
        .connection()
        .take_data_channel()
        .ok_or_else(|| SessionError::TransportError("peer connection has no data channel".to_string()))?;

    // Candidates go out as soon as they are gathered, concurrently with the
    // offer/answer exchange below.
    if let Some(candidates) = connection.connection().take_local_candidates() {
        tokio::spawn(relay_candidates(
            signaling.clone(),
            provider_session_id.to_string(),
            candidates,
            token.clone(),
        ));
    }

    let offer = connection.connection().create_offer().await?;
    let answer = signaling.relay_offer(provider_session_id, &offer).await?;
    connection.connection().apply_answer(&answer).await?;
    debug!("Remote answer applied");

    if let Some(remote_audio) = connection.connection().take_remote_audio() {
        tokio::spawn(play_remote_audio(remote_audio, sink, token.clone()));
    }
    tokio::spawn(forward_data_channel(incoming, events, token.clone()));

    Ok(PeerTransport {
        outgoing,
        _tasks: tasks,
        _connection: connection,
        microphone,
    })
}

/// Relays each gathered candidate in its own task. Failures are logged only:
/// a candidate can arrive after the path is already viable. Relays still in
/// flight when the transport closes are abandoned.
async fn relay_candidates(
    signaling: Arc<dyn SignalingClient>,
    provider_session_id: String,
    mut candidates: mpsc::Receiver<IceCandidate>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            candidate = candidates.recv() => {
                let Some(candidate) = candidate else { break };
                let signaling = signaling.clone();
                let provider_session_id = provider_session_id.clone();
                let token = token.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = token.cancelled() => debug!("ICE candidate relay abandoned"),
                        result = signaling.relay_ice_candidate(&provider_session_id, &candidate) => {
                            if let Err(e) = result {
                                warn!(error = %e, "ICE candidate relay failed");
                            }
                        }
                    }
                });
            }
        }
    }
}

async fn play_remote_audio(
    mut frames: mpsc::Receiver<AudioFrame>,
    sink: Arc<dyn AudioSink>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            frame = frames.recv() => match frame {
                Some(frame) => sink.play(frame),
                None => break,
            },
        }
    }
}

async fn forward_data_channel(
    mut incoming: mpsc::Receiver<String>,
    events: mpsc::Sender<TransportEvent>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            message = incoming.recv() => match message {
                Some(text) => {
                    if !forward_text_event(&text, &events).await {
                        break;
                    }
                }
                None => {
                    let _ = events
                        .send(TransportEvent::Closed { reason: "data channel closed".to_string() })
                        .await;
                    break;
                }
            },
        }
    }
}
