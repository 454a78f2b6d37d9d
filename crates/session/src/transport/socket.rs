//! Socket-audio transport: one duplex socket to the relay's stream endpoint,
//! binary frames for PCM audio and text frames for structured events.

use super::{TransportEvent, forward_text_event};
use crate::{
    audio::{SOCKET_AUDIO_SAMPLE_RATE, decode_pcm16, encode_pcm16},
    media::{AudioFrame, AudioSink, MediaDevices, MicrophoneGuard},
    signaling::{SignalingClient, map_relay_error},
};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use reqwest::StatusCode;
use serde::Deserialize;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tokio::{net::TcpStream, sync::mpsc};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{Error as WsError, protocol::Message as WsMessage},
};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};
use tutorlink_core::{ErrorCode, SessionError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub(crate) struct SocketTransport {
    outgoing: mpsc::Sender<String>,
    capture_enabled: Arc<AtomicBool>,
    token: CancellationToken,
    _tasks: DropGuard,
    _microphone: MicrophoneGuard,
}

impl SocketTransport {
    pub(crate) fn set_capture_enabled(&self, enabled: bool) {
        self.capture_enabled.store(enabled, Ordering::SeqCst);
    }

    pub(crate) fn outgoing(&self) -> &mpsc::Sender<String> {
        &self.outgoing
    }

    /// Cancels the pumps and gives the writer a moment to send a close frame.
    pub(crate) async fn close(self) {
        self.token.cancel();
        tokio::task::yield_now().await;
    }
}

/// Opens the audio socket and waits for the provider's first frame.
///
/// The handshake alone does not mean the provider side is live, so the
/// transport only counts as connected once a frame other than a setup error
/// has arrived.
pub(crate) async fn connect(
    devices: Arc<dyn MediaDevices>,
    signaling: &dyn SignalingClient,
    provider_session_id: &str,
    sink: Arc<dyn AudioSink>,
    events: mpsc::Sender<TransportEvent>,
) -> Result<SocketTransport, SessionError> {
    let mut microphone = MicrophoneGuard::new(devices.acquire_microphone().await?);
    let url = signaling.stream_url(provider_session_id)?;

    let (ws_stream, _) = connect_async(url.as_str()).await.map_err(handshake_error)?;
    debug!("Audio socket handshake complete");
    let (ws_tx, mut ws_rx) = ws_stream.split();

    let first = ws_rx.next().await;
    if let Some(Ok(WsMessage::Text(text))) = &first {
        if let Some(err) = setup_error(text.as_str()) {
            warn!(error = %err, "Relay refused the audio stream");
            return Err(err);
        }
    }
    match handle_inbound(first, sink.as_ref(), &events).await {
        Inbound::Continue => {}
        Inbound::Detached => {
            return Err(SessionError::TransportError("session went away during setup".to_string()));
        }
        Inbound::Closed(reason) => {
            return Err(SessionError::TransportError(format!("{} during setup", reason)));
        }
    }
    info!("Audio socket connected");

    let token = CancellationToken::new();
    let capture_enabled = Arc::new(AtomicBool::new(true));
    let (outgoing_tx, outgoing_rx) = mpsc::channel(32);

    tokio::spawn(write_loop(
        ws_tx,
        microphone.take_frames(),
        outgoing_rx,
        capture_enabled.clone(),
        token.clone(),
    ));
    tokio::spawn(read_loop(ws_rx, sink, events, token.clone()));

    Ok(SocketTransport {
        outgoing: outgoing_tx,
        capture_enabled,
        _tasks: token.clone().drop_guard(),
        token,
        _microphone: microphone,
    })
}

/// A setup failure the relay reports in-band before closing the socket.
#[derive(Deserialize)]
struct SetupErrorFrame {
    #[serde(rename = "type")]
    kind: String,
    message: String,
    code: ErrorCode,
}

fn setup_error(text: &str) -> Option<SessionError> {
    let frame: SetupErrorFrame = serde_json::from_str(text).ok()?;
    (frame.kind == "error").then(|| SessionError::from_code(frame.code, frame.message))
}

/// Maps a refused upgrade back into the relay's error taxonomy.
fn handshake_error(e: WsError) -> SessionError {
    match e {
        WsError::Http(response) => {
            let status = response.status();
            let body = response
                .body()
                .as_deref()
                .map(String::from_utf8_lossy)
                .unwrap_or_default();
            if body.is_empty() && matches!(status, StatusCode::NOT_FOUND | StatusCode::GONE) {
                return SessionError::SessionNotFound("provider session is no longer available".to_string());
            }
            map_relay_error(status, &body)
        }
        e => SessionError::TransportError(format!("failed to open audio socket: {}", e)),
    }
}

async fn next_frame(frames: &mut Option<mpsc::Receiver<AudioFrame>>) -> Option<AudioFrame> {
    match frames {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn write_loop(
    mut ws_tx: SplitSink<WsStream, WsMessage>,
    mut frames: Option<mpsc::Receiver<AudioFrame>>,
    mut outgoing: mpsc::Receiver<String>,
    capture_enabled: Arc<AtomicBool>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                let _ = ws_tx.send(WsMessage::Close(None)).await;
                break;
            }
            Some(text) = outgoing.recv() => {
                if let Err(e) = ws_tx.send(WsMessage::Text(text.into())).await {
                    warn!(error = %e, "Failed to send event on audio socket");
                    break;
                }
            }
            frame = next_frame(&mut frames) => match frame {
                Some(frame) => {
                    if !capture_enabled.load(Ordering::SeqCst) {
                        continue;
                    }
                    let pcm = encode_pcm16(&frame.samples);
                    if let Err(e) = ws_tx.send(WsMessage::Binary(pcm.into())).await {
                        warn!(error = %e, "Failed to send audio on audio socket");
                        break;
                    }
                }
                None => {
                    debug!("Microphone stream ended");
                    frames = None;
                }
            },
        }
    }
}

enum Inbound {
    Continue,
    /// Nobody is listening for events any more.
    Detached,
    Closed(String),
}

async fn handle_inbound(
    message: Option<Result<WsMessage, WsError>>,
    sink: &dyn AudioSink,
    events: &mpsc::Sender<TransportEvent>,
) -> Inbound {
    match message {
        Some(Ok(WsMessage::Binary(data))) => {
            sink.play(AudioFrame {
                samples: decode_pcm16(&data),
                sample_rate: SOCKET_AUDIO_SAMPLE_RATE,
            });
            Inbound::Continue
        }
        Some(Ok(WsMessage::Text(text))) => {
            if forward_text_event(text.as_str(), events).await {
                Inbound::Continue
            } else {
                Inbound::Detached
            }
        }
        Some(Ok(WsMessage::Close(frame))) => Inbound::Closed(
            frame
                .map(|f| format!("socket closed: {}", f.reason.as_str()))
                .unwrap_or_else(|| "socket closed".to_string()),
        ),
        Some(Ok(_)) => Inbound::Continue,
        Some(Err(e)) => Inbound::Closed(format!("socket error: {}", e)),
        None => Inbound::Closed("socket ended".to_string()),
    }
}

async fn read_loop(
    mut ws_rx: SplitStream<WsStream>,
    sink: Arc<dyn AudioSink>,
    events: mpsc::Sender<TransportEvent>,
    token: CancellationToken,
) {
    let reason = loop {
        let message = tokio::select! {
            _ = token.cancelled() => return,
            message = ws_rx.next() => message,
        };
        match handle_inbound(message, sink.as_ref(), &events).await {
            Inbound::Continue => {}
            Inbound::Detached => return,
            Inbound::Closed(reason) => break reason,
        }
    };
    let _ = events.send(TransportEvent::Closed { reason }).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        FakeDevices, FakeSignaling, RecordingSink, ResourceCounter, eventually, spawn_stream_stub,
    };
    use tokio::net::TcpListener;
    use tutorlink_core::events::{ClientEvent, ProviderEvent};
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path},
    };

    struct Fixture {
        counter: ResourceCounter,
        devices: FakeDevices,
        signaling: FakeSignaling,
    }

    impl Fixture {
        fn new(stream_url: impl Into<String>) -> Self {
            let counter = ResourceCounter::default();
            let signaling = FakeSignaling::new(counter.clone());
            *signaling.stream_url.lock().unwrap() = stream_url.into();
            Self {
                devices: FakeDevices::new(counter.clone()),
                signaling,
                counter,
            }
        }

        async fn connect(
            &self,
            sink: Arc<RecordingSink>,
            events: mpsc::Sender<TransportEvent>,
        ) -> Result<SocketTransport, SessionError> {
            connect(Arc::new(self.devices.clone()), &self.signaling, "sess_1", sink, events).await
        }
    }

    #[tokio::test]
    async fn test_socket_transport_round_trip() {
        let mut pcm = Vec::new();
        pcm.extend_from_slice(&16384i16.to_le_bytes());
        let mut stub = spawn_stream_stub(
            vec![
                WsMessage::Text(
                    r#"{"type":"conversation.item.input_audio_transcription.completed","transcript":"hello"}"#.into(),
                ),
                WsMessage::Binary(pcm.into()),
            ],
            false,
        )
        .await;
        let fx = Fixture::new(stub.url.clone());
        let sink = Arc::new(RecordingSink::default());
        let (tx, mut rx) = mpsc::channel(8);

        let transport = fx.connect(sink.clone(), tx).await.unwrap();

        assert_eq!(
            rx.recv().await.unwrap(),
            TransportEvent::Provider(ProviderEvent::UserTranscript {
                transcript: "hello".into()
            })
        );
        assert!(eventually(|| sink.frames().len() == 1).await);
        assert_eq!(sink.frames()[0].samples, vec![0.5]);

        // Captured audio is forwarded only while the gate is open.
        let mic = fx.devices.latest_frames().unwrap();
        transport.set_capture_enabled(false);
        mic.send(AudioFrame { samples: vec![0.1; 2], sample_rate: 24_000 }).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        transport.set_capture_enabled(true);
        mic.send(AudioFrame { samples: vec![0.5], sample_rate: 24_000 }).await.unwrap();
        match stub.seen.recv().await.unwrap() {
            WsMessage::Binary(data) => assert_eq!(decode_pcm16(&data), vec![0.5]),
            other => panic!("expected audio, got {:?}", other),
        }

        transport
            .outgoing()
            .send(ClientEvent::ResponseCreate.to_json())
            .await
            .unwrap();
        match stub.seen.recv().await.unwrap() {
            WsMessage::Text(text) => assert_eq!(text.as_str(), r#"{"type":"response.create"}"#),
            other => panic!("expected event, got {:?}", other),
        }

        transport.close().await;
        assert!(matches!(stub.seen.recv().await.unwrap(), WsMessage::Close(_)));
        assert_eq!(fx.counter.microphones_open(), 0);
    }

    #[tokio::test]
    async fn test_in_band_setup_error_keeps_its_code() {
        let stub = spawn_stream_stub(
            vec![WsMessage::Text(
                r#"{"type":"error","message":"The session has expired.","code":"session_not_found"}"#.into(),
            )],
            true,
        )
        .await;
        let fx = Fixture::new(stub.url.clone());
        let (tx, mut rx) = mpsc::channel(8);

        let err = fx.connect(Arc::new(RecordingSink::default()), tx).await.err().unwrap();
        assert_eq!(err, SessionError::SessionNotFound("The session has expired.".to_string()));
        assert_eq!(fx.counter.microphones_open(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_provider_error_event_is_not_a_setup_failure() {
        let stub = spawn_stream_stub(
            vec![WsMessage::Text(r#"{"type":"error","error":{"message":"rate limited"}}"#.into())],
            false,
        )
        .await;
        let fx = Fixture::new(stub.url.clone());
        let (tx, mut rx) = mpsc::channel(8);

        let transport = fx.connect(Arc::new(RecordingSink::default()), tx).await.unwrap();
        assert!(matches!(
            rx.recv().await.unwrap(),
            TransportEvent::Provider(ProviderEvent::Error(_))
        ));
        transport.close().await;
    }

    #[tokio::test]
    async fn test_close_before_first_frame_fails_connect() {
        let stub = spawn_stream_stub(vec![], true).await;
        let fx = Fixture::new(stub.url.clone());
        let (tx, _rx) = mpsc::channel(8);

        let err = fx.connect(Arc::new(RecordingSink::default()), tx).await.err().unwrap();
        assert!(matches!(err, SessionError::TransportError(_)));
        assert_eq!(fx.counter.microphones_open(), 0);
    }

    #[tokio::test]
    async fn test_refused_upgrade_maps_relay_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/realtime/stream"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
                "message": "The session has expired.",
                "code": "session_not_found",
            })))
            .mount(&server)
            .await;
        let fx = Fixture::new(format!("ws://{}/realtime/stream?providerSessionId=sess_1", server.address()));
        let (tx, _rx) = mpsc::channel(8);

        let err = fx.connect(Arc::new(RecordingSink::default()), tx).await.err().unwrap();
        assert!(matches!(err, SessionError::SessionNotFound(_)));
        assert_eq!(fx.counter.microphones_open(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_socket_is_a_transport_error() {
        // Bind then drop to get a port nothing listens on.
        let port = TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap().port();
        let fx = Fixture::new(format!("ws://127.0.0.1:{}/realtime/stream", port));
        let (tx, _rx) = mpsc::channel(8);

        let err = fx.connect(Arc::new(RecordingSink::default()), tx).await.err().unwrap();
        assert!(matches!(err, SessionError::TransportError(_)));
        assert_eq!(fx.counter.microphones_open(), 0);
    }

    #[test]
    fn test_setup_error_requires_a_code() {
        assert!(setup_error(r#"{"type":"error","error":{"message":"x"}}"#).is_none());
        assert!(setup_error(r#"{"type":"session.created"}"#).is_none());
        assert_eq!(
            setup_error(r#"{"type":"error","message":"m","code":"provider_unavailable"}"#),
            Some(SessionError::ProviderUnavailable("m".to_string()))
        );
    }
}
