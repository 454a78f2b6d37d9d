//! Agent Graph
//!
//! The static set of agent personas a conversation may be handed between.
//! The graph is built and validated once at startup and is read-only
//! afterwards; cycles such as `specialist <-> support` are allowed, edges to
//! agents that do not exist are not.

use crate::{error::SessionError, events::ToolCall, events::TransferArgs};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

pub type AgentId = String;

/// One agent persona and the agents it may hand the conversation to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDefinition {
    pub id: AgentId,
    pub display_name: String,
    pub instructions: String,
    #[serde(default)]
    pub allowed_handoff_targets: BTreeSet<AgentId>,
    /// Spoken when the agent takes over after a handoff.
    #[serde(default)]
    pub greeting: Option<String>,
}

impl AgentDefinition {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            instructions: instructions.into(),
            allowed_handoff_targets: BTreeSet::new(),
            greeting: None,
        }
    }

    pub fn with_targets<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_handoff_targets = targets.into_iter().map(Into::into).collect();
        self
    }

    pub fn can_hand_off_to(&self, target: &str) -> bool {
        self.allowed_handoff_targets.contains(target)
    }

    /// System prompt for a session run by this agent on `topic`.
    pub fn prompt_for_topic(&self, topic: &str) -> String {
        let mut prompt = format!(
            "{}\n\n# Topic context\nThe learner is studying: {}",
            self.instructions.trim_end(),
            topic
        );
        if !self.allowed_handoff_targets.is_empty() {
            let targets: Vec<&str> = self.allowed_handoff_targets.iter().map(String::as_str).collect();
            prompt.push_str(&format!(
                "\n\nYou may transfer the conversation to: {}.",
                targets.join(", ")
            ));
        }
        prompt
    }

    pub fn greeting_text(&self) -> String {
        self.greeting
            .clone()
            .unwrap_or_else(|| format!("Hi, this is {}. How can I help?", self.display_name))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("agent graph has no agents")]
    Empty,
    #[error("agent '{0}' is defined more than once")]
    DuplicateAgent(AgentId),
    #[error("agent '{from}' lists unknown handoff target '{to}'")]
    UnknownTarget { from: AgentId, to: AgentId },
    #[error("initial agent '{0}' is not defined")]
    UnknownInitialAgent(AgentId),
    #[error("failed to parse agent graph: {0}")]
    Parse(String),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AgentGraphFile {
    initial_agent: Option<AgentId>,
    agents: Vec<AgentDefinition>,
}

/// Immutable lookup table of agents and their legal transitions.
#[derive(Debug, Clone)]
pub struct AgentGraph {
    agents: HashMap<AgentId, AgentDefinition>,
    initial_agent: AgentId,
}

impl AgentGraph {
    /// Builds the graph, rejecting duplicate ids and dangling edges.
    ///
    /// When `initial_agent` is `None` the first definition is the entry point.
    pub fn new(
        definitions: Vec<AgentDefinition>,
        initial_agent: Option<AgentId>,
    ) -> Result<Self, GraphError> {
        let first = definitions.first().ok_or(GraphError::Empty)?.id.clone();
        let initial_agent = initial_agent.unwrap_or(first);

        let mut agents = HashMap::with_capacity(definitions.len());
        for definition in definitions {
            if agents.contains_key(&definition.id) {
                return Err(GraphError::DuplicateAgent(definition.id));
            }
            agents.insert(definition.id.clone(), definition);
        }

        for definition in agents.values() {
            if let Some(missing) = definition
                .allowed_handoff_targets
                .iter()
                .find(|target| !agents.contains_key(*target))
            {
                return Err(GraphError::UnknownTarget {
                    from: definition.id.clone(),
                    to: missing.clone(),
                });
            }
        }

        if !agents.contains_key(&initial_agent) {
            return Err(GraphError::UnknownInitialAgent(initial_agent));
        }

        Ok(Self {
            agents,
            initial_agent,
        })
    }

    pub fn from_json(json: &str) -> Result<Self, GraphError> {
        let file: AgentGraphFile =
            serde_json::from_str(json).map_err(|e| GraphError::Parse(e.to_string()))?;
        Self::new(file.agents, file.initial_agent)
    }

    pub fn from_path(path: &Path) -> Result<Self, GraphError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| GraphError::Parse(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&json)
    }

    pub fn get(&self, id: &str) -> Option<&AgentDefinition> {
        self.agents.get(id)
    }

    pub fn initial_agent(&self) -> &AgentDefinition {
        // Presence is checked in `new`.
        &self.agents[&self.initial_agent]
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Checks that `from` may hand off to `to` and returns the destination.
    pub fn validate_handoff(&self, from: &str, to: &str) -> Result<&AgentDefinition, SessionError> {
        let current = self
            .get(from)
            .ok_or_else(|| SessionError::InvalidHandoff(format!("unknown current agent '{}'", from)))?;
        let destination = self
            .get(to)
            .ok_or_else(|| SessionError::InvalidHandoff(format!("unknown destination agent '{}'", to)))?;
        if !current.can_hand_off_to(to) {
            return Err(SessionError::InvalidHandoff(format!(
                "'{}' may not hand off to '{}'",
                from, to
            )));
        }
        Ok(destination)
    }
}

/// A transfer requested by the provider, not yet validated against the graph.
#[derive(Debug, Clone, PartialEq)]
pub struct HandoffRequest {
    pub from_agent: AgentId,
    pub to_agent: AgentId,
    pub rationale: String,
    pub conversation_context: Option<String>,
}

impl HandoffRequest {
    /// Parses a `transfer_agents` tool call issued while `from_agent` is active.
    pub fn from_tool_call(from_agent: &str, call: &ToolCall) -> Result<Self, SessionError> {
        let args: TransferArgs = call
            .parse_arguments()
            .map_err(|e| SessionError::InvalidHandoff(format!("malformed transfer arguments: {}", e)))?;
        if args.destination_agent.trim().is_empty() {
            return Err(SessionError::InvalidHandoff(
                "transfer has no destination".to_string(),
            ));
        }
        Ok(Self {
            from_agent: from_agent.to_string(),
            to_agent: args.destination_agent,
            rationale: args.rationale_for_transfer,
            conversation_context: args.conversation_context,
        })
    }
}
