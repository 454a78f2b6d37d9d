//! Session lifecycle management.
//!
//! A `Session` owns one underlying connection attempt and walks the state
//! machine `initializing → connecting → connected → disconnected`. The work is
//! done by a driver task spawned when the session is created; the `Session`
//! value is only a handle onto it, exposing status, transcript and provider
//! event streams plus the `speak`/`stop_speaking`/`disconnect` controls.
//!
//! There is no reconnection. Once a session is `disconnected` a new one must
//! be created.

use crate::{
    media::{AudioSink, RuntimeCapabilities},
    recorder::{HttpSessionRecorder, SessionRecorder},
    signaling::{HttpSignalingClient, SignalingClient},
    transport::{TransportEvent, TransportHandle, TransportNegotiator},
};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    sync::{Arc, Mutex, OnceLock},
};
use tokio::{
    sync::{broadcast, mpsc, oneshot, watch},
    task::JoinHandle,
};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{Instrument, debug, info, info_span, warn};
use tutorlink_core::{
    ErrorReport, SessionError,
    events::{ClientEvent, ProviderEvent},
    protocol::{
        CreateSessionRequest, RecordStatus, TEMP_SESSION_PREFIX, TransportMethod,
        is_temporary_session_id,
    },
    transcript::{OriginRole, Transcript, TranscriptEntry},
};
use uuid::Uuid;

pub const DEFAULT_WELCOME_MESSAGE: &str = "Connected. Start speaking whenever you are ready.";

const EVENT_CHANNEL_CAPACITY: usize = 64;
const CONTROL_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Initializing,
    Connecting,
    Connected,
    Disconnected,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Initializing => write!(f, "initializing"),
            SessionStatus::Connecting => write!(f, "connecting"),
            SessionStatus::Connected => write!(f, "connected"),
            SessionStatus::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// Client-side settings for talking to the relay.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Base URL of the backend relay, e.g. `https://app.example.com/api`.
    pub relay_url: String,
    /// Authenticated user; enables persisted session records.
    pub user_id: Option<String>,
    pub welcome_message: String,
    /// Whether captured audio flows as soon as the session connects.
    pub capture_on_connect: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            relay_url: "http://127.0.0.1:3000".to_string(),
            user_id: None,
            welcome_message: DEFAULT_WELCOME_MESSAGE.to_string(),
            capture_on_connect: true,
        }
    }
}

/// Everything that is fixed for one underlying connection.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub topic: String,
    pub system_prompt: Option<String>,
    pub agent_mode: Option<String>,
    /// Agent persona the provider speaks as; attributed on agent transcript entries.
    pub agent_id: Option<String>,
    /// Appended as a system entry once connected. `None` appends nothing.
    pub welcome_message: Option<String>,
}

impl SessionOptions {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            ..Default::default()
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();
        self.system_prompt = (!prompt.trim().is_empty()).then_some(prompt);
        self
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        let agent_id = agent_id.into();
        self.agent_mode = Some(agent_id.clone());
        self.agent_id = Some(agent_id);
        self
    }

    pub fn with_welcome_message(mut self, message: impl Into<String>) -> Self {
        self.welcome_message = Some(message.into());
        self
    }
}

/// Creates sessions. Cheap to clone; clones share the relay client and runtime.
#[derive(Clone)]
pub struct SessionManager {
    signaling: Arc<dyn SignalingClient>,
    negotiator: TransportNegotiator,
    sink: Arc<dyn AudioSink>,
    recorder: Option<Arc<dyn SessionRecorder>>,
    welcome_message: String,
    capture_on_connect: bool,
}

impl SessionManager {
    /// Builds a manager that talks to the relay over HTTP.
    pub fn new(
        config: &SessionConfig,
        capabilities: RuntimeCapabilities,
        sink: Arc<dyn AudioSink>,
    ) -> Result<Self, SessionError> {
        let mut signaling = HttpSignalingClient::new(&config.relay_url)?;
        let mut recorder = HttpSessionRecorder::new(&config.relay_url)?;
        if let Some(user_id) = &config.user_id {
            signaling = signaling.with_user_id(user_id);
            recorder = recorder.with_user_id(user_id);
        }
        Ok(Self::with_signaling(Arc::new(signaling), capabilities, sink)
            .with_recorder(Arc::new(recorder))
            .with_welcome_message(config.welcome_message.clone())
            .with_capture_on_connect(config.capture_on_connect))
    }

    pub fn with_signaling(
        signaling: Arc<dyn SignalingClient>,
        capabilities: RuntimeCapabilities,
        sink: Arc<dyn AudioSink>,
    ) -> Self {
        Self {
            negotiator: TransportNegotiator::new(capabilities, signaling.clone()),
            signaling,
            sink,
            recorder: None,
            welcome_message: DEFAULT_WELCOME_MESSAGE.to_string(),
            capture_on_connect: true,
        }
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn SessionRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn with_welcome_message(mut self, message: impl Into<String>) -> Self {
        self.welcome_message = message.into();
        self
    }

    pub fn with_capture_on_connect(mut self, enabled: bool) -> Self {
        self.capture_on_connect = enabled;
        self
    }

    /// Starts a session for `topic` and returns its handle immediately, in
    /// `initializing`. An empty `system_prompt` leaves the provider default.
    pub fn create_session(&self, topic: &str, system_prompt: &str) -> Result<Session, SessionError> {
        let options = SessionOptions::new(topic)
            .with_system_prompt(system_prompt)
            .with_welcome_message(self.welcome_message.clone());
        self.create_session_with(options, Transcript::new())
    }

    /// Like `create_session`, but resolves once the session is connected and
    /// returns its terminal error otherwise.
    pub async fn open_session(&self, topic: &str, system_prompt: &str) -> Result<Session, SessionError> {
        let session = self.create_session(topic, system_prompt)?;
        session.wait_until_settled().await?;
        Ok(session)
    }

    /// Starts a session that appends to an existing `transcript`.
    pub fn create_session_with(
        &self,
        options: SessionOptions,
        transcript: Transcript,
    ) -> Result<Session, SessionError> {
        if options.topic.trim().is_empty() {
            return Err(SessionError::InvalidInput("topic is required".to_string()));
        }

        let (control_tx, control_rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let shared = Arc::new(SessionShared {
            local_session_id: Mutex::new(format!("{}{}", TEMP_SESSION_PREFIX, Uuid::new_v4())),
            provider_session_id: OnceLock::new(),
            transport: OnceLock::new(),
            status: watch::Sender::new(SessionStatus::Initializing),
            transitions: Mutex::new(vec![SessionStatus::Initializing]),
            error: Mutex::new(None),
            transcript,
            events: events_tx,
            control: control_tx,
            cancel: cancel.clone(),
            driver: Mutex::new(None),
            options,
        });

        let driver = Driver {
            shared: shared.clone(),
            signaling: self.signaling.clone(),
            negotiator: self.negotiator.clone(),
            sink: self.sink.clone(),
            recorder: self.recorder.clone(),
            capture_on_connect: self.capture_on_connect,
        };
        let span = info_span!(
            "session",
            local_session_id = %shared.local_session_id(),
            topic = %shared.options.topic,
            agent = shared.options.agent_id.as_deref().unwrap_or("-"),
        );
        let handle = tokio::spawn(driver.run(control_rx).instrument(span));
        *lock(&shared.driver) = Some(handle);

        Ok(Session {
            handle: Arc::new(SessionHandle {
                _guard: cancel.drop_guard(),
                shared,
            }),
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

enum Control {
    Capture(bool),
    Send(ClientEvent, oneshot::Sender<Result<(), SessionError>>),
}

struct SessionShared {
    options: SessionOptions,
    local_session_id: Mutex<String>,
    provider_session_id: OnceLock<String>,
    transport: OnceLock<TransportMethod>,
    status: watch::Sender<SessionStatus>,
    transitions: Mutex<Vec<SessionStatus>>,
    error: Mutex<Option<SessionError>>,
    transcript: Transcript,
    events: broadcast::Sender<ProviderEvent>,
    control: mpsc::Sender<Control>,
    cancel: CancellationToken,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl SessionShared {
    fn local_session_id(&self) -> String {
        lock(&self.local_session_id).clone()
    }

    fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    /// Moves the state machine forward. Backward transitions are ignored.
    fn advance(&self, next: SessionStatus) -> bool {
        let changed = self.status.send_if_modified(|current| {
            if next > *current {
                *current = next;
                true
            } else {
                false
            }
        });
        if changed {
            lock(&self.transitions).push(next);
            info!(status = %next, "Session status changed");
        }
        changed
    }
}

/// Cancels the driver once the last `Session` clone is gone.
struct SessionHandle {
    shared: Arc<SessionShared>,
    _guard: DropGuard,
}

/// Handle onto one live conversation attempt. Clones refer to the same session.
#[derive(Clone)]
pub struct Session {
    handle: Arc<SessionHandle>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("local_session_id", &self.local_session_id())
            .field("provider_session_id", &self.provider_session_id())
            .field("status", &self.status())
            .finish()
    }
}

impl Session {
    fn shared(&self) -> &SessionShared {
        &self.handle.shared
    }

    /// Host-application id: the persisted record id, or a `temp-` id.
    pub fn local_session_id(&self) -> String {
        self.shared().local_session_id()
    }

    pub fn provider_session_id(&self) -> Option<&str> {
        self.shared().provider_session_id.get().map(String::as_str)
    }

    pub fn transport(&self) -> Option<TransportMethod> {
        self.shared().transport.get().copied()
    }

    pub fn topic(&self) -> &str {
        &self.shared().options.topic
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.shared().options.system_prompt.as_deref()
    }

    pub fn agent_id(&self) -> Option<&str> {
        self.shared().options.agent_id.as_deref()
    }

    pub fn status(&self) -> SessionStatus {
        self.shared().status()
    }

    /// Every status this session has been in, in order.
    pub fn transitions(&self) -> Vec<SessionStatus> {
        lock(&self.shared().transitions).clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.shared().status.subscribe()
    }

    pub fn transcript(&self) -> &Transcript {
        &self.shared().transcript
    }

    pub fn subscribe_transcript(&self) -> broadcast::Receiver<TranscriptEntry> {
        self.shared().transcript.subscribe()
    }

    /// Structured provider events, including tool calls, as they arrive.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ProviderEvent> {
        self.shared().events.subscribe()
    }

    /// The error that ended the session, if it ended on one.
    pub fn error(&self) -> Option<SessionError> {
        lock(&self.shared().error).clone()
    }

    pub fn error_report(&self) -> Option<ErrorReport> {
        self.error().map(|e| e.report())
    }

    /// Starts forwarding captured audio to the provider.
    pub async fn speak(&self) -> Result<(), SessionError> {
        if self.status() != SessionStatus::Connected {
            return Err(SessionError::InvalidInput("session is not connected".to_string()));
        }
        self.shared()
            .control
            .send(Control::Capture(true))
            .await
            .map_err(|_| SessionError::TransportError("session has ended".to_string()))
    }

    /// Stops forwarding captured audio. A no-op unless connected.
    pub async fn stop_speaking(&self) -> Result<(), SessionError> {
        if self.status() != SessionStatus::Connected {
            return Ok(());
        }
        let _ = self.shared().control.send(Control::Capture(false)).await;
        Ok(())
    }

    /// Sends a structured event to the provider over the live transport.
    pub async fn send_event(&self, event: ClientEvent) -> Result<(), SessionError> {
        if self.status() != SessionStatus::Connected {
            return Err(SessionError::InvalidInput("session is not connected".to_string()));
        }
        let (tx, rx) = oneshot::channel();
        self.shared()
            .control
            .send(Control::Send(event, tx))
            .await
            .map_err(|_| SessionError::TransportError("session has ended".to_string()))?;
        rx.await
            .map_err(|_| SessionError::TransportError("session has ended".to_string()))?
    }

    /// Ends the session from any state and waits until every resource it held
    /// is released. In-flight setup calls are abandoned, not awaited.
    pub async fn disconnect(&self) {
        self.shared().cancel.cancel();
        let driver = lock(&self.shared().driver).take();
        match driver {
            Some(handle) => {
                if let Err(e) = handle.await {
                    warn!(error = %e, "Session driver did not finish cleanly");
                }
                self.shared().advance(SessionStatus::Disconnected);
            }
            None => {
                let mut rx = self.subscribe_status();
                let _ = rx.wait_for(|s| *s == SessionStatus::Disconnected).await;
            }
        }
    }

    /// Waits until the session is connected or has ended.
    pub async fn wait_until_settled(&self) -> Result<(), SessionError> {
        let mut rx = self.subscribe_status();
        let status = *rx
            .wait_for(|s| *s >= SessionStatus::Connected)
            .await
            .map_err(|_| SessionError::TransportError("session has ended".to_string()))?;
        if status == SessionStatus::Connected {
            return Ok(());
        }
        Err(self
            .error()
            .unwrap_or_else(|| SessionError::TransportError("session was disconnected".to_string())))
    }
}

struct Driver {
    shared: Arc<SessionShared>,
    signaling: Arc<dyn SignalingClient>,
    negotiator: TransportNegotiator,
    sink: Arc<dyn AudioSink>,
    recorder: Option<Arc<dyn SessionRecorder>>,
    capture_on_connect: bool,
}

impl Driver {
    async fn run(self, control_rx: mpsc::Receiver<Control>) {
        let outcome = self.establish_and_pump(control_rx).await;
        if let Err(e) = outcome {
            warn!(error = %e, code = %e.code(), "Session ended with an error");
            *lock(&self.shared.error) = Some(e);
        }
        self.shared.advance(SessionStatus::Disconnected);
        self.mark_record_ended();
    }

    async fn establish_and_pump(&self, mut control_rx: mpsc::Receiver<Control>) -> Result<(), SessionError> {
        let cancel = self.shared.cancel.clone();
        let options = &self.shared.options;
        let method = self.negotiator.select();

        let request = CreateSessionRequest {
            topic: Some(options.topic.clone()),
            system_prompt: options.system_prompt.clone(),
            transport_method: Some(method),
            agent_mode: options.agent_mode.clone(),
        };
        let created = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            created = self.signaling.create_session(&request) => created?,
        };
        *lock(&self.shared.local_session_id) = created.session_id.clone();
        let provider_session_id = self
            .shared
            .provider_session_id
            .get_or_init(|| created.provider_session_id.clone())
            .clone();
        let _ = self.shared.transport.set(method);
        info!(%provider_session_id, transport = %method, "Provider session created");
        self.shared.advance(SessionStatus::Connecting);

        let (events_tx, mut events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        // Dropping the connect future on cancellation releases whatever it
        // had acquired so far.
        let handle = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            handle = self.negotiator.connect(method, &provider_session_id, self.sink.clone(), events_tx) => handle?,
        };
        handle.set_capture_enabled(self.capture_on_connect);
        self.shared.advance(SessionStatus::Connected);
        if let Some(welcome) = &options.welcome_message {
            self.shared
                .transcript
                .append(TranscriptEntry::new(OriginRole::System, welcome.clone()));
        }

        let result = self.pump(&handle, &mut control_rx, &mut events_rx).await;
        handle.close().await;
        result
    }

    async fn pump(
        &self,
        handle: &TransportHandle,
        control_rx: &mut mpsc::Receiver<Control>,
        events_rx: &mut mpsc::Receiver<TransportEvent>,
    ) -> Result<(), SessionError> {
        loop {
            tokio::select! {
                biased;
                _ = self.shared.cancel.cancelled() => {
                    debug!("Disconnect requested");
                    return Ok(());
                }
                Some(control) = control_rx.recv() => match control {
                    Control::Capture(enabled) => {
                        debug!(enabled, "Capture gate changed");
                        handle.set_capture_enabled(enabled);
                    }
                    Control::Send(event, reply) => {
                        let _ = reply.send(handle.send_event(&event).await);
                    }
                },
                event = events_rx.recv() => match event {
                    Some(TransportEvent::Provider(event)) => self.on_provider_event(event),
                    Some(TransportEvent::Closed { reason }) => {
                        return Err(SessionError::TransportError(reason));
                    }
                    None => {
                        return Err(SessionError::TransportError("transport stopped".to_string()));
                    }
                },
            }
        }
    }

    fn on_provider_event(&self, event: ProviderEvent) {
        let transcript = &self.shared.transcript;
        match &event {
            ProviderEvent::UserTranscript { transcript: text } => {
                transcript.append(TranscriptEntry::new(OriginRole::User, text.clone()));
            }
            ProviderEvent::AgentTranscript { transcript: text } => {
                transcript.append(
                    TranscriptEntry::new(OriginRole::Agent, text.clone())
                        .with_agent(self.shared.options.agent_id.clone()),
                );
            }
            ProviderEvent::Error(error) => {
                warn!(message = error.message(), "Provider reported an error");
                transcript.append(TranscriptEntry::new(
                    OriginRole::System,
                    format!("Provider error: {}", error.message()),
                ));
            }
            ProviderEvent::ToolCall(call) => {
                debug!(name = %call.name, call_id = %call.call_id, "Tool call received");
            }
            ProviderEvent::Unknown => {}
        }
        let _ = self.shared.events.send(event);
    }

    fn mark_record_ended(&self) {
        let Some(recorder) = self.recorder.clone() else {
            return;
        };
        let record_id = self.shared.local_session_id();
        if is_temporary_session_id(&record_id) {
            return;
        }
        tokio::spawn(async move {
            if let Err(e) = recorder.mark_status(&record_id, RecordStatus::Ended).await {
                warn!(error = ?e, %record_id, "Failed to mark session record ended");
            }
        });
    }
}
