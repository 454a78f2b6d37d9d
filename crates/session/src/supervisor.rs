//! Supervisor delegation.
//!
//! The live session answers ordinary turns itself. When the provider calls the
//! supervisor tool, the request is queued for a slower text model; answers are
//! appended to the transcript and returned to the provider as the tool's
//! output. Requests are answered strictly one at a time, in arrival order,
//! and the live session is never blocked waiting on them.

use crate::lifecycle::Session;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::Url;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{Instrument, debug, info, info_span, warn};
use tutorlink_core::{
    events::{ClientEvent, ProviderEvent, SUPERVISOR_TOOL, SupervisorArgs, ToolCall},
    llm_client::SupervisorModel,
    protocol::{SupervisorRequest, SupervisorResponse},
    transcript::{OriginRole, TranscriptEntry},
};

/// Delegates supervisor tool calls from one session. Dropping it stops the
/// worker; calls still queued are abandoned.
pub struct SupervisorDelegation {
    queue: mpsc::UnboundedSender<ToolCall>,
    /// Requests queued or in flight; the supervisor is thinking while non-zero.
    pending: Arc<watch::Sender<usize>>,
    _tasks: DropGuard,
}

impl SupervisorDelegation {
    /// Starts listening to `session` for supervisor tool calls.
    pub fn attach(session: Session, model: Arc<dyn SupervisorModel>) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let pending = Arc::new(watch::Sender::new(0usize));
        let token = CancellationToken::new();

        let delegation = Self {
            queue: queue_tx,
            pending: pending.clone(),
            _tasks: token.clone().drop_guard(),
        };

        let span = info_span!("supervisor", local_session_id = %session.local_session_id());
        tokio::spawn(
            listen(
                session.subscribe_events(),
                delegation.queue.clone(),
                pending.clone(),
                token.clone(),
            )
            .instrument(span.clone()),
        );
        let worker = Worker {
            session,
            model,
            pending,
        };
        tokio::spawn(worker.run(queue_rx, token).instrument(span));
        delegation
    }

    /// Queues a supervisor request directly, bypassing the event stream.
    pub fn enqueue(&self, call: ToolCall) {
        enqueue(&self.queue, &self.pending, call);
    }

    pub fn is_supervisor_thinking(&self) -> bool {
        self.pending() > 0
    }

    /// Number of requests queued or in flight, as it changes.
    pub fn subscribe_pending(&self) -> watch::Receiver<usize> {
        self.pending.subscribe()
    }

    pub fn pending(&self) -> usize {
        *self.pending.borrow()
    }
}

fn enqueue(queue: &mpsc::UnboundedSender<ToolCall>, pending: &watch::Sender<usize>, call: ToolCall) {
    pending.send_modify(|n| *n += 1);
    if queue.send(call).is_err() {
        pending.send_modify(|n| *n = n.saturating_sub(1));
    }
}

async fn listen(
    mut events: broadcast::Receiver<ProviderEvent>,
    queue: mpsc::UnboundedSender<ToolCall>,
    pending: Arc<watch::Sender<usize>>,
    token: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = token.cancelled() => break,
            event = events.recv() => event,
        };
        match event {
            Ok(ProviderEvent::ToolCall(call)) if call.name == SUPERVISOR_TOOL => {
                debug!(call_id = %call.call_id, "Supervisor request queued");
                enqueue(&queue, &pending, call);
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Supervisor listener fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

struct Worker {
    session: Session,
    model: Arc<dyn SupervisorModel>,
    pending: Arc<watch::Sender<usize>>,
}

impl Worker {
    async fn run(self, mut queue: mpsc::UnboundedReceiver<ToolCall>, token: CancellationToken) {
        loop {
            let call = tokio::select! {
                _ = token.cancelled() => break,
                call = queue.recv() => match call {
                    Some(call) => call,
                    None => break,
                },
            };
            self.answer(call).await;
            self.pending.send_modify(|n| *n = n.saturating_sub(1));
        }
    }

    async fn answer(&self, call: ToolCall) {
        let args: SupervisorArgs = call.parse_arguments().unwrap_or_else(|e| {
            warn!(error = %e, call_id = %call.call_id, "Malformed supervisor arguments");
            SupervisorArgs::default()
        });
        let transcript = self.session.transcript().entries();

        let output = match self
            .model
            .respond(&transcript, &args.relevant_context_from_last_user_message)
            .await
        {
            Ok(text) => {
                info!(call_id = %call.call_id, "Supervisor answered");
                self.session
                    .transcript()
                    .append(TranscriptEntry::new(OriginRole::Supervisor, text.clone()));
                json!({ "nextResponse": text })
            }
            Err(e) => {
                warn!(error = ?e, call_id = %call.call_id, "Supervisor model failed");
                json!({ "error": "The supervisor could not answer right now." })
            }
        };

        for event in [
            ClientEvent::function_output(call.call_id.clone(), output.to_string()),
            ClientEvent::ResponseCreate,
        ] {
            if let Err(e) = self.session.send_event(event).await {
                debug!(error = %e, "Session no longer accepts supervisor output");
                return;
            }
        }
    }
}

/// `SupervisorModel` served by the backend's `/supervisor/respond` endpoint,
/// so the model credential stays on the server.
pub struct HttpSupervisorModel {
    http: reqwest::Client,
    endpoint: Url,
}

impl HttpSupervisorModel {
    pub fn new(base_url: &str) -> Result<Self> {
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        let endpoint = Url::parse(&normalized)
            .and_then(|base| base.join("supervisor/respond"))
            .context("Invalid relay URL")?;
        Ok(Self {
            http: reqwest::Client::new(),
            endpoint,
        })
    }
}

#[async_trait]
impl SupervisorModel for HttpSupervisorModel {
    async fn respond(&self, transcript: &[TranscriptEntry], request: &str) -> Result<String> {
        let body = SupervisorRequest {
            transcript: transcript.to_vec(),
            request: request.to_string(),
        };
        let response = self
            .http
            .post(self.endpoint.clone())
            .json(&body)
            .send()
            .await
            .context("Failed to reach the supervisor endpoint")?;
        if !response.status().is_success() {
            bail!("supervisor endpoint returned {}", response.status());
        }
        let response: SupervisorResponse = response
            .json()
            .await
            .context("Failed to decode supervisor response")?;
        Ok(response.text)
    }
}
