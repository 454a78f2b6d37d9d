//! Out-of-band text model used by the supervisor delegation layer.

use crate::transcript::{OriginRole, TranscriptEntry};
use anyhow::{Context, Result, anyhow};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;
use tracing::debug;

pub const DEFAULT_SUPERVISOR_INSTRUCTIONS: &str = "You are a supervising tutor. A junior voice agent \
is talking with a learner and has asked you for the next response. Read the conversation, answer the \
request accurately and concisely, and phrase the answer so the junior agent can read it aloud verbatim.";

/// A slower, more capable model that answers turns the live session delegates.
#[async_trait]
pub trait SupervisorModel: Send + Sync {
    async fn respond(&self, transcript: &[TranscriptEntry], request: &str) -> Result<String>;
}

/// Builds the chat history for a supervisor call.
///
/// System entries are connection notices, not conversation, so they are left out.
pub fn build_messages(
    instructions: &str,
    transcript: &[TranscriptEntry],
    request: &str,
) -> Result<Vec<ChatCompletionRequestMessage>> {
    let mut messages: Vec<ChatCompletionRequestMessage> = vec![
        ChatCompletionRequestSystemMessageArgs::default()
            .content(instructions)
            .build()?
            .into(),
    ];
    for entry in transcript {
        match entry.origin_role {
            OriginRole::User => messages.push(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(entry.text.clone())
                    .build()?
                    .into(),
            ),
            OriginRole::Agent | OriginRole::Supervisor => messages.push(
                ChatCompletionRequestAssistantMessageArgs::default()
                    .content(entry.text.clone())
                    .build()?
                    .into(),
            ),
            OriginRole::System => {}
        }
    }
    messages.push(
        ChatCompletionRequestUserMessageArgs::default()
            .content(format!("Request from the voice agent: {}", request))
            .build()?
            .into(),
    );
    Ok(messages)
}

/// A `SupervisorModel` backed by any OpenAI-compatible chat completion API.
pub struct OpenAICompatibleClient {
    client: Client<OpenAIConfig>,
    model: String,
    instructions: String,
}

impl OpenAICompatibleClient {
    /// # Arguments
    ///
    /// * `config` - API key and base URL of the OpenAI-compatible service.
    /// * `model` - Chat model identifier (e.g., "gpt-4.1").
    pub fn new(config: OpenAIConfig, model: String) -> Self {
        Self {
            client: Client::with_config(config),
            model,
            instructions: DEFAULT_SUPERVISOR_INSTRUCTIONS.to_string(),
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }
}

#[async_trait]
impl SupervisorModel for OpenAICompatibleClient {
    async fn respond(&self, transcript: &[TranscriptEntry], request: &str) -> Result<String> {
        let messages = build_messages(&self.instructions, transcript, request)?;
        debug!(model = %self.model, turns = messages.len(), "Calling supervisor model");

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .build()?;
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .context("supervisor completion request failed")?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| anyhow!("supervisor response had no text content"))
    }
}
