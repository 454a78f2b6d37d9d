//! Agent handoff.
//!
//! The coordinator keeps track of which agent persona is live and reacts to
//! `transfer_agents` tool calls. A valid transfer tears the current session
//! down completely before a new one is created with the destination agent's
//! instructions, so two agents are never connected at the same time. All
//! sessions append to one shared transcript.

use crate::lifecycle::{Session, SessionManager, SessionOptions};
use serde_json::json;
use std::sync::{
    Arc, Mutex, Weak,
    atomic::{AtomicBool, Ordering},
};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, instrument, warn};
use tutorlink_core::{
    SessionError,
    agent::{AgentGraph, AgentId, HandoffRequest},
    events::{ClientEvent, ProviderEvent, TRANSFER_TOOL, ToolCall},
    transcript::{Transcript, TranscriptEntry},
};

pub struct HandoffCoordinator {
    graph: Arc<AgentGraph>,
    manager: SessionManager,
    topic: String,
    transcript: Transcript,
    current_agent: Mutex<AgentId>,
    active: Mutex<Option<Session>>,
    is_handing_off: AtomicBool,
    cancel: CancellationToken,
    weak_self: Weak<HandoffCoordinator>,
}

/// Clears the handoff flag on every exit path of a transfer.
struct HandoffGuard<'a>(&'a AtomicBool);

impl Drop for HandoffGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

fn conversation_ended() -> SessionError {
    SessionError::TransportError("conversation was disconnected".to_string())
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl HandoffCoordinator {
    pub fn new(graph: Arc<AgentGraph>, manager: SessionManager, topic: impl Into<String>) -> Arc<Self> {
        let initial = graph.initial_agent().id.clone();
        Arc::new_cyclic(|weak_self| Self {
            graph,
            manager,
            topic: topic.into(),
            transcript: Transcript::new(),
            current_agent: Mutex::new(initial),
            active: Mutex::new(None),
            is_handing_off: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            weak_self: weak_self.clone(),
        })
    }

    pub fn current_agent(&self) -> AgentId {
        lock(&self.current_agent).clone()
    }

    pub fn is_handing_off(&self) -> bool {
        self.is_handing_off.load(Ordering::SeqCst)
    }

    pub fn active_session(&self) -> Option<Session> {
        lock(&self.active).clone()
    }

    /// The conversation across every agent that has been live.
    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Connects the initial agent and waits until it is live.
    #[instrument(skip(self), fields(topic = %self.topic))]
    pub async fn start(&self) -> Result<Session, SessionError> {
        let agent = self.current_agent();
        info!(%agent, "Starting conversation");
        let session = self.open_for_agent(&agent)?;
        self.settle_and_greet(&session, &agent).await?;
        Ok(session)
    }

    pub async fn speak(&self) -> Result<(), SessionError> {
        if self.is_handing_off() {
            return Err(SessionError::HandoffInProgress);
        }
        match self.active_session() {
            Some(session) => session.speak().await,
            None => Err(SessionError::InvalidInput("no active session".to_string())),
        }
    }

    pub async fn stop_speaking(&self) -> Result<(), SessionError> {
        match self.active_session() {
            Some(session) => session.stop_speaking().await,
            None => Ok(()),
        }
    }

    /// Ends the conversation, including a handoff that is still connecting.
    pub async fn disconnect(&self) {
        self.cancel.cancel();
        let session = lock(&self.active).take();
        if let Some(session) = session {
            session.disconnect().await;
        }
    }

    /// Acts on a tool call from the live session. Only transfers are handled;
    /// a rejected transfer is reported back to the provider and the
    /// conversation continues.
    pub async fn handle_tool_call(&self, call: &ToolCall) -> Result<(), SessionError> {
        if call.name != TRANSFER_TOOL {
            return Ok(());
        }
        let result = match HandoffRequest::from_tool_call(&self.current_agent(), call) {
            Ok(request) => self.transfer(request).await.map(|_| ()),
            Err(e) => Err(e),
        };
        if let Err(SessionError::InvalidHandoff(reason)) = &result {
            warn!(%reason, "Ignoring transfer request");
            self.report_rejection(&call.call_id, reason).await;
        }
        result
    }

    /// Moves the conversation to `request.to_agent`.
    ///
    /// Invalid requests leave the live session untouched. For a valid one the
    /// old session is fully disconnected before the new one is created.
    #[instrument(skip(self, request), fields(from = %request.from_agent, to = %request.to_agent))]
    pub async fn transfer(&self, request: HandoffRequest) -> Result<Session, SessionError> {
        let current = self.current_agent();
        if request.from_agent != current {
            return Err(SessionError::InvalidHandoff(format!(
                "transfer issued by '{}' but '{}' is live",
                request.from_agent, current
            )));
        }
        let destination = self
            .graph
            .validate_handoff(&current, &request.to_agent)?
            .clone();

        if self
            .is_handing_off
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SessionError::HandoffInProgress);
        }
        let _guard = HandoffGuard(&self.is_handing_off);

        let rationale = if request.rationale.trim().is_empty() {
            format!("Transferring you to {}.", destination.display_name)
        } else {
            request.rationale.clone()
        };
        self.transcript
            .append(TranscriptEntry::from_agent(current.clone(), rationale));

        let previous = lock(&self.active).take();
        if let Some(previous) = previous {
            previous.disconnect().await;
            debug!("Previous session torn down");
        }

        *lock(&self.current_agent) = destination.id.clone();
        if self.cancel.is_cancelled() {
            return Err(conversation_ended());
        }
        let session = self.open_for_agent(&destination.id)?;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                session.disconnect().await;
                return Err(conversation_ended());
            }
            settled = self.settle_and_greet(&session, &destination.id) => settled?,
        }
        info!("Handoff complete");
        Ok(session)
    }

    fn open_for_agent(&self, agent_id: &str) -> Result<Session, SessionError> {
        let definition = self
            .graph
            .get(agent_id)
            .ok_or_else(|| SessionError::InvalidHandoff(format!("unknown agent '{}'", agent_id)))?;
        let options = SessionOptions::new(self.topic.clone())
            .with_system_prompt(definition.prompt_for_topic(&self.topic))
            .with_agent(agent_id);
        let session = self
            .manager
            .create_session_with(options, self.transcript.clone())?;

        self.spawn_listener(session.subscribe_events(), agent_id);
        *lock(&self.active) = Some(session.clone());
        Ok(session)
    }

    async fn settle_and_greet(&self, session: &Session, agent_id: &str) -> Result<(), SessionError> {
        session.wait_until_settled().await?;
        let greeting = self
            .graph
            .get(agent_id)
            .map(|definition| definition.greeting_text())
            .unwrap_or_default();
        self.transcript
            .append(TranscriptEntry::from_agent(agent_id, greeting));
        Ok(())
    }

    fn spawn_listener(&self, mut events: broadcast::Receiver<ProviderEvent>, agent_id: &str) {
        let coordinator = self.weak_self.clone();
        let cancel = self.cancel.clone();
        let span = info_span!("handoff_listener", agent = %agent_id);
        tokio::spawn(
            async move {
                loop {
                    let event = tokio::select! {
                        _ = cancel.cancelled() => break,
                        event = events.recv() => event,
                    };
                    match event {
                        Ok(ProviderEvent::ToolCall(call)) => {
                            let Some(coordinator) = coordinator.upgrade() else { break };
                            // Errors are logged by the coordinator.
                            let _ = coordinator.handle_tool_call(&call).await;
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Handoff listener fell behind");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
                debug!("Handoff listener stopped");
            }
            .instrument(span),
        );
    }

    async fn report_rejection(&self, call_id: &str, reason: &str) {
        let Some(session) = self.active_session() else {
            return;
        };
        let output = json!({ "success": false, "error": reason }).to_string();
        for event in [ClientEvent::function_output(call_id, output), ClientEvent::ResponseCreate] {
            if let Err(e) = session.send_event(event).await {
                debug!(error = %e, "Could not report rejected transfer");
                return;
            }
        }
    }
}
