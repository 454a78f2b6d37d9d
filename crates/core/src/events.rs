//! Structured events exchanged with the conversational provider.
//!
//! Inbound events arrive as JSON text frames on the socket transport or as
//! data-channel messages on the peer-media transport; both are parsed here so
//! the layers above never care which transport produced them.

use serde::{Deserialize, Serialize, de::DeserializeOwned};

/// Tool the provider calls to move the conversation to another agent.
pub const TRANSFER_TOOL: &str = "transfer_agents";
/// Tool the provider calls to delegate a turn to the supervisor model.
pub const SUPERVISOR_TOOL: &str = "get_next_response_from_supervisor";

/// Events sent by the provider that the session layers act on.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ProviderEvent {
    /// Final transcription of what the user said.
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    UserTranscript { transcript: String },
    /// Final transcript of what the agent said.
    #[serde(rename = "response.audio_transcript.done")]
    AgentTranscript { transcript: String },
    #[serde(rename = "response.function_call_arguments.done")]
    ToolCall(ToolCall),
    #[serde(rename = "error")]
    Error(ProviderErrorEvent),
    #[serde(other)]
    Unknown,
}

impl ProviderEvent {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// A machine-actionable instruction embedded in the provider's stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub name: String,
    /// Usually a JSON-encoded string; some providers send an object.
    #[serde(default)]
    pub arguments: serde_json::Value,
}

impl ToolCall {
    pub fn new(call_id: impl Into<String>, name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// Decodes the arguments, accepting both string-encoded and inline JSON.
    pub fn parse_arguments<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        match &self.arguments {
            serde_json::Value::String(raw) => serde_json::from_str(raw),
            other => serde_json::from_value(other.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProviderErrorEvent {
    #[serde(default)]
    pub error: Option<ProviderErrorBody>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProviderErrorBody {
    #[serde(default)]
    pub message: String,
}

impl ProviderErrorEvent {
    pub fn message(&self) -> &str {
        self.error
            .as_ref()
            .map(|e| e.message.as_str())
            .or(self.message.as_deref())
            .unwrap_or("unknown provider error")
    }
}

/// Arguments of the `transfer_agents` tool.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TransferArgs {
    pub destination_agent: String,
    #[serde(default)]
    pub rationale_for_transfer: String,
    #[serde(default)]
    pub conversation_context: Option<String>,
}

/// Arguments of the supervisor delegation tool.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct SupervisorArgs {
    #[serde(default)]
    pub relevant_context_from_last_user_message: String,
}

/// Events the client sends back to the provider over the live transport.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },
    #[serde(rename = "response.create")]
    ResponseCreate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationItem {
    FunctionCallOutput { call_id: String, output: String },
}

impl ClientEvent {
    pub fn function_output(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        ClientEvent::ConversationItemCreate {
            item: ConversationItem::FunctionCallOutput {
                call_id: call_id.into(),
                output: output.into(),
            },
        }
    }

    pub fn to_json(&self) -> String {
        // Only strings and unit variants; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_user_transcript() {
        let text = r#"{"type":"conversation.item.input_audio_transcription.completed","event_id":"e1","item_id":"i1","transcript":"what is entropy?"}"#;
        assert_eq!(
            ProviderEvent::parse(text).unwrap(),
            ProviderEvent::UserTranscript {
                transcript: "what is entropy?".into()
            }
        );
    }

    #[test]
    fn test_parse_tool_call_with_string_arguments() {
        let text = r#"{"type":"response.function_call_arguments.done","call_id":"call_1","name":"transfer_agents","arguments":"{\"destination_agent\":\"support\",\"rationale_for_transfer\":\"billing question\"}"}"#;
        let ProviderEvent::ToolCall(call) = ProviderEvent::parse(text).unwrap() else {
            panic!("expected a tool call");
        };
        assert_eq!(call.name, TRANSFER_TOOL);
        let args: TransferArgs = call.parse_arguments().unwrap();
        assert_eq!(args.destination_agent, "support");
        assert_eq!(args.rationale_for_transfer, "billing question");
        assert!(args.conversation_context.is_none());
    }

    #[test]
    fn test_tool_call_accepts_inline_object_arguments() {
        let call = ToolCall::new(
            "call_2",
            SUPERVISOR_TOOL,
            json!({"relevant_context_from_last_user_message": "second law"}),
        );
        let args: SupervisorArgs = call.parse_arguments().unwrap();
        assert_eq!(args.relevant_context_from_last_user_message, "second law");
    }

    #[test]
    fn test_unknown_event_types_are_tolerated() {
        let text = r#"{"type":"response.audio.delta","delta":"AAAA"}"#;
        assert_eq!(ProviderEvent::parse(text).unwrap(), ProviderEvent::Unknown);
    }

    #[test]
    fn test_error_event_message_variants() {
        let nested = ProviderEvent::parse(r#"{"type":"error","error":{"message":"rate limited"}}"#).unwrap();
        let flat = ProviderEvent::parse(r#"{"type":"error","message":"upstream closed"}"#).unwrap();
        match (nested, flat) {
            (ProviderEvent::Error(a), ProviderEvent::Error(b)) => {
                assert_eq!(a.message(), "rate limited");
                assert_eq!(b.message(), "upstream closed");
            }
            other => panic!("unexpected events: {:?}", other),
        }
    }

    #[test]
    fn test_client_event_serialization() {
        let value: serde_json::Value =
            serde_json::from_str(&ClientEvent::function_output("call_1", "done").to_json()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "conversation.item.create",
                "item": {"type": "function_call_output", "call_id": "call_1", "output": "done"}
            })
        );
        assert_eq!(ClientEvent::ResponseCreate.to_json(), r#"{"type":"response.create"}"#);
    }
}
