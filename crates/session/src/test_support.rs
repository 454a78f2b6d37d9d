//! In-crate fakes for the runtime and the relay.

use crate::media::{
    AudioFrame, AudioSink, DataChannel, MediaDevices, MicrophoneTrack, PeerConnection, PeerMediaApi,
};
use crate::signaling::SignalingClient;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};
use std::time::Duration;
use tokio::{net::TcpListener, sync::mpsc};
use tokio_tungstenite::{accept_async, tungstenite::protocol::Message as WsMessage};
use tutorlink_core::{
    SessionError,
    protocol::{CreateSessionRequest, CreateSessionResponse, IceCandidate, is_plausible_sdp},
};

/// Counts acquired and released resources and keeps an ordered event log.
#[derive(Clone, Default)]
pub struct ResourceCounter {
    inner: Arc<Counters>,
}

#[derive(Default)]
struct Counters {
    mics_acquired: AtomicUsize,
    mics_released: AtomicUsize,
    peers_opened: AtomicUsize,
    peers_closed: AtomicUsize,
    log: Mutex<Vec<String>>,
}

impl ResourceCounter {
    pub fn microphones_open(&self) -> usize {
        self.inner.mics_acquired.load(Ordering::SeqCst) - self.inner.mics_released.load(Ordering::SeqCst)
    }

    pub fn microphones_acquired(&self) -> usize {
        self.inner.mics_acquired.load(Ordering::SeqCst)
    }

    pub fn peers_open(&self) -> usize {
        self.inner.peers_opened.load(Ordering::SeqCst) - self.inner.peers_closed.load(Ordering::SeqCst)
    }

    pub fn log(&self, event: impl Into<String>) {
        self.inner.log.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.inner.log.lock().unwrap().clone()
    }
}

pub struct FakeMicrophone {
    counter: ResourceCounter,
    frames: Option<mpsc::Receiver<AudioFrame>>,
    enabled: Arc<AtomicBool>,
    stopped: bool,
}

impl MicrophoneTrack for FakeMicrophone {
    fn take_frames(&mut self) -> Option<mpsc::Receiver<AudioFrame>> {
        self.frames.take()
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.counter.inner.mics_released.fetch_add(1, Ordering::SeqCst);
            self.counter.log("microphone_released");
        }
    }
}

#[derive(Clone)]
pub struct FakeDevices {
    counter: ResourceCounter,
    deny: bool,
    frame_senders: Arc<Mutex<Vec<mpsc::Sender<AudioFrame>>>>,
    enabled_flags: Arc<Mutex<Vec<Arc<AtomicBool>>>>,
}

impl FakeDevices {
    pub fn new(counter: ResourceCounter) -> Self {
        Self {
            counter,
            deny: false,
            frame_senders: Arc::default(),
            enabled_flags: Arc::default(),
        }
    }

    pub fn denying(counter: ResourceCounter) -> Self {
        Self {
            deny: true,
            ..Self::new(counter)
        }
    }

    /// Sender feeding the most recently acquired microphone.
    pub fn latest_frames(&self) -> Option<mpsc::Sender<AudioFrame>> {
        self.frame_senders.lock().unwrap().last().cloned()
    }

    /// Whether the most recently acquired microphone is enabled.
    pub fn latest_enabled(&self) -> Option<bool> {
        self.enabled_flags
            .lock()
            .unwrap()
            .last()
            .map(|flag| flag.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl MediaDevices for FakeDevices {
    async fn acquire_microphone(&self) -> Result<Box<dyn MicrophoneTrack>, SessionError> {
        if self.deny {
            return Err(SessionError::DeviceAccessDenied("permission dismissed".into()));
        }
        let (tx, rx) = mpsc::channel(16);
        let enabled = Arc::new(AtomicBool::new(true));
        self.frame_senders.lock().unwrap().push(tx);
        self.enabled_flags.lock().unwrap().push(enabled.clone());
        self.counter.inner.mics_acquired.fetch_add(1, Ordering::SeqCst);
        self.counter.log("microphone_acquired");
        Ok(Box::new(FakeMicrophone {
            counter: self.counter.clone(),
            frames: Some(rx),
            enabled,
            stopped: false,
        }))
    }
}

pub fn candidate(n: u8) -> IceCandidate {
    IceCandidate {
        candidate: format!("candidate:{n} 1 udp 2122260223 10.0.0.{n} 5000{n} typ host"),
        sdp_mid: Some("0".into()),
        sdp_m_line_index: Some(0),
    }
}

/// Peer media runtime whose connections gather a fixed list of candidates.
#[derive(Clone)]
pub struct FakePeerApi {
    counter: ResourceCounter,
    candidates: Vec<IceCandidate>,
    candidate_senders: Arc<Mutex<Vec<mpsc::Sender<IceCandidate>>>>,
    event_senders: Arc<Mutex<Vec<mpsc::Sender<String>>>>,
    sent: Arc<Mutex<Vec<String>>>,
}

impl FakePeerApi {
    pub fn new(counter: ResourceCounter) -> Self {
        Self {
            counter,
            candidates: vec![candidate(1), candidate(2)],
            candidate_senders: Arc::default(),
            event_senders: Arc::default(),
            sent: Arc::default(),
        }
    }

    pub fn with_candidates(mut self, candidates: Vec<IceCandidate>) -> Self {
        self.candidates = candidates;
        self
    }

    /// Sender delivering data-channel messages to the newest connection.
    pub fn latest_events(&self) -> Option<mpsc::Sender<String>> {
        self.event_senders.lock().unwrap().last().cloned()
    }

    /// Sender for candidates gathered later by the newest connection.
    pub fn latest_candidates(&self) -> Option<mpsc::Sender<IceCandidate>> {
        self.candidate_senders.lock().unwrap().last().cloned()
    }

    /// Drops the provider side of every data channel, as a remote hang-up would.
    pub fn hang_up(&self) {
        self.event_senders.lock().unwrap().clear();
    }

    /// Messages the client wrote to any data channel.
    pub fn sent_messages(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl PeerMediaApi for FakePeerApi {
    async fn create_connection(&self) -> Result<Box<dyn PeerConnection>, SessionError> {
        self.counter.inner.peers_opened.fetch_add(1, Ordering::SeqCst);
        self.counter.log("peer_opened");

        let (cand_tx, cand_rx) = mpsc::channel(self.candidates.len() + 8);
        for c in &self.candidates {
            let _ = cand_tx.try_send(c.clone());
        }
        self.candidate_senders.lock().unwrap().push(cand_tx);

        let (audio_tx, audio_rx) = mpsc::channel(4);
        let _ = audio_tx.try_send(AudioFrame {
            samples: vec![0.25; 4],
            sample_rate: 24_000,
        });

        let (in_tx, in_rx) = mpsc::channel(16);
        self.event_senders.lock().unwrap().push(in_tx);

        let (out_tx, mut out_rx) = mpsc::channel::<String>(16);
        let sent = self.sent.clone();
        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                sent.lock().unwrap().push(msg);
            }
        });

        Ok(Box::new(FakePeerConnection {
            counter: self.counter.clone(),
            candidates: Some(cand_rx),
            remote_audio: Some(audio_rx),
            data_channel: Some(DataChannel {
                incoming: in_rx,
                outgoing: out_tx,
            }),
            closed: false,
        }))
    }
}

pub struct FakePeerConnection {
    counter: ResourceCounter,
    candidates: Option<mpsc::Receiver<IceCandidate>>,
    remote_audio: Option<mpsc::Receiver<AudioFrame>>,
    data_channel: Option<DataChannel>,
    closed: bool,
}

#[async_trait]
impl PeerConnection for FakePeerConnection {
    fn attach_microphone(&mut self, _frames: mpsc::Receiver<AudioFrame>) {
        self.counter.log("microphone_attached");
    }

    fn take_local_candidates(&mut self) -> Option<mpsc::Receiver<IceCandidate>> {
        self.candidates.take()
    }

    fn take_remote_audio(&mut self) -> Option<mpsc::Receiver<AudioFrame>> {
        self.remote_audio.take()
    }

    fn take_data_channel(&mut self) -> Option<DataChannel> {
        self.data_channel.take()
    }

    async fn create_offer(&mut self) -> Result<String, SessionError> {
        Ok("v=0\r\no=- fake-offer".to_string())
    }

    async fn apply_answer(&mut self, sdp: &str) -> Result<(), SessionError> {
        if !is_plausible_sdp(sdp) {
            return Err(SessionError::SignalingRejected("answer is not SDP".into()));
        }
        self.counter.log("answer_applied");
        Ok(())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.counter.inner.peers_closed.fetch_add(1, Ordering::SeqCst);
            self.counter.log("transport_closed");
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Behavior {
    Succeed,
    Fail,
    Hang,
}

/// Relay fake with per-operation behaviour and call counters.
pub struct FakeSignaling {
    counter: ResourceCounter,
    pub create: Mutex<Behavior>,
    pub offer: Mutex<Behavior>,
    pub ice: Mutex<Behavior>,
    /// Delay before the answer is returned, letting candidates race it.
    pub offer_delay: Mutex<Duration>,
    pub ice_calls: AtomicUsize,
    ice_in_flight: AtomicUsize,
    pub prompts: Mutex<Vec<String>>,
    pub stream_url: Mutex<String>,
    /// Hand out persisted record ids instead of `temp-` ids.
    pub persisted: AtomicBool,
    created: AtomicUsize,
}

impl FakeSignaling {
    pub fn new(counter: ResourceCounter) -> Self {
        Self {
            counter,
            create: Mutex::new(Behavior::Succeed),
            offer: Mutex::new(Behavior::Succeed),
            ice: Mutex::new(Behavior::Succeed),
            offer_delay: Mutex::new(Duration::ZERO),
            ice_calls: AtomicUsize::new(0),
            ice_in_flight: AtomicUsize::new(0),
            prompts: Mutex::default(),
            stream_url: Mutex::new("ws://127.0.0.1:9/realtime/stream".into()),
            persisted: AtomicBool::new(false),
            created: AtomicUsize::new(0),
        }
    }

    pub fn set_create(&self, behavior: Behavior) {
        *self.create.lock().unwrap() = behavior;
    }

    pub fn set_offer(&self, behavior: Behavior) {
        *self.offer.lock().unwrap() = behavior;
    }

    pub fn ice_calls(&self) -> usize {
        self.ice_calls.load(Ordering::SeqCst)
    }

    /// Candidate relays started but neither finished nor abandoned.
    pub fn ice_in_flight(&self) -> usize {
        self.ice_in_flight.load(Ordering::SeqCst)
    }
}

/// Decrements the counter when the call that entered it ends or is dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl SignalingClient for FakeSignaling {
    async fn create_session(
        &self,
        request: &CreateSessionRequest,
    ) -> Result<CreateSessionResponse, SessionError> {
        self.counter.log("create_session");
        self.prompts
            .lock()
            .unwrap()
            .push(request.system_prompt.clone().unwrap_or_default());
        let behavior = *self.create.lock().unwrap();
        match behavior {
            Behavior::Succeed => {
                let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
                let prefix = if self.persisted.load(Ordering::SeqCst) { "rec-" } else { "temp-" };
                Ok(CreateSessionResponse {
                    session_id: format!("{prefix}{n}"),
                    provider_session_id: format!("sess_{n}"),
                    expires_at: None,
                })
            }
            Behavior::Fail => Err(SessionError::ProviderUnavailable(
                "provider credential is not configured".into(),
            )),
            Behavior::Hang => std::future::pending().await,
        }
    }

    async fn relay_offer(&self, _provider_session_id: &str, _sdp: &str) -> Result<String, SessionError> {
        let delay = *self.offer_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let behavior = *self.offer.lock().unwrap();
        match behavior {
            Behavior::Succeed => Ok("v=0\r\no=- fake-answer".to_string()),
            Behavior::Fail => Err(SessionError::SignalingRejected("malformed offer".into())),
            Behavior::Hang => std::future::pending().await,
        }
    }

    async fn relay_ice_candidate(
        &self,
        _provider_session_id: &str,
        _candidate: &IceCandidate,
    ) -> Result<(), SessionError> {
        self.ice_calls.fetch_add(1, Ordering::SeqCst);
        let _in_flight = InFlight::enter(&self.ice_in_flight);
        let behavior = *self.ice.lock().unwrap();
        match behavior {
            Behavior::Succeed => Ok(()),
            Behavior::Fail => Err(SessionError::ProviderUnavailable("relay down".into())),
            Behavior::Hang => std::future::pending().await,
        }
    }

    fn stream_url(&self, _provider_session_id: &str) -> Result<String, SessionError> {
        Ok(self.stream_url.lock().unwrap().clone())
    }
}

#[derive(Default)]
pub struct RecordingSink {
    frames: Mutex<Vec<AudioFrame>>,
}

impl RecordingSink {
    pub fn frames(&self) -> Vec<AudioFrame> {
        self.frames.lock().unwrap().clone()
    }
}

impl AudioSink for RecordingSink {
    fn play(&self, frame: AudioFrame) {
        self.frames.lock().unwrap().push(frame);
    }
}

pub fn session_created_frame() -> WsMessage {
    WsMessage::Text(r#"{"type":"session.created"}"#.into())
}

/// Loopback stream endpoint serving a single socket.
pub struct StreamStub {
    pub url: String,
    /// Every message the client sent, in order.
    pub seen: mpsc::Receiver<WsMessage>,
    hang_up: mpsc::Sender<()>,
}

impl StreamStub {
    /// Closes the socket from the server side.
    pub async fn hang_up(&self) {
        let _ = self.hang_up.send(()).await;
    }
}

/// Accepts one socket and sends `opening`. With `close_after_opening` the
/// stub then closes; otherwise it records client messages until either side
/// closes. An empty `opening` leaves the client waiting.
pub async fn spawn_stream_stub(opening: Vec<WsMessage>, close_after_opening: bool) -> StreamStub {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (seen_tx, seen_rx) = mpsc::channel(32);
    let (hang_up_tx, mut hang_up_rx) = mpsc::channel(1);
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        for message in opening {
            ws.send(message).await.unwrap();
        }
        if close_after_opening {
            let _ = ws.close(None).await;
            return;
        }
        loop {
            tokio::select! {
                Some(()) = hang_up_rx.recv() => {
                    let _ = ws.close(None).await;
                    break;
                }
                message = ws.next() => match message {
                    Some(Ok(message)) => {
                        let is_close = matches!(message, WsMessage::Close(_));
                        let _ = seen_tx.send(message).await;
                        if is_close {
                            break;
                        }
                    }
                    _ => break,
                },
            }
        }
    });
    StreamStub {
        url: format!("ws://{}/realtime/stream?providerSessionId=sess_1", addr),
        seen: seen_rx,
        hang_up: hang_up_tx,
    }
}

/// Polls `condition` until it holds or a second has passed.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
