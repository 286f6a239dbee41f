use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// Session Identifier
// ============================================================================

/// Opaque, caller-supplied identifier correlating a conversation across invocations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh identifier for callers that don't supply one.
    pub fn generate() -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("session-{}", &id[..12]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

// ============================================================================
// Messages
// ============================================================================

/// Author of a message in the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A structured request, emitted by a generation step, to invoke a named tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Correlation id echoed back by the matching tool-result message
    pub id: String,
    /// Tool name as bound to the stage
    pub name: String,
    /// Argument mapping (JSON object)
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: Self::fresh_id(),
            name: name.into(),
            arguments,
        }
    }

    /// A new `call_<uuid>` correlation id.
    pub fn fresh_id() -> String {
        format!("call_{}", uuid::Uuid::new_v4().simple())
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

/// One entry of the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Set on tool-result messages; references a call emitted earlier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn with_role(role: Role, content: Option<String>) -> Self {
        Self {
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::with_role(Role::System, Some(text.into()))
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::with_role(Role::User, Some(text.into()))
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, Some(text.into()))
    }

    pub fn assistant_tool_call(call: ToolCall) -> Self {
        Self {
            tool_calls: vec![call],
            ..Self::with_role(Role::Assistant, None)
        }
    }

    pub fn tool_result(call_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            ..Self::with_role(Role::Tool, Some(text.into()))
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Non-empty text content, if any.
    pub fn text(&self) -> Option<&str> {
        self.content.as_deref().filter(|c| !c.trim().is_empty())
    }

    /// A message with neither text nor tool calls carries nothing worth recording.
    pub fn is_empty(&self) -> bool {
        self.text().is_none() && self.tool_calls.is_empty()
    }
}

// ============================================================================
// Conversation State
// ============================================================================

#[derive(Debug, Error, PartialEq)]
pub enum ConversationError {
    #[error("tool result references unknown call id '{0}'")]
    OrphanToolResult(String),
    #[error("tool call '{0}' already has a result")]
    DuplicateToolResult(String),
}

/// Append-only, causally ordered message history of one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    messages: Vec<Message>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message. Tool results must answer a call emitted earlier, once.
    pub fn push(&mut self, message: Message) -> Result<(), ConversationError> {
        if message.role == Role::Tool {
            let call_id = message.tool_call_id.clone().unwrap_or_default();
            if !self.has_call(&call_id) {
                return Err(ConversationError::OrphanToolResult(call_id));
            }
            if self.has_result(&call_id) {
                return Err(ConversationError::DuplicateToolResult(call_id));
            }
        }
        self.messages.push(message);
        Ok(())
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Whether the latest message carries a tool-invocation request.
    pub fn last_has_tool_calls(&self) -> bool {
        self.last().is_some_and(Message::has_tool_calls)
    }

    fn has_call(&self, call_id: &str) -> bool {
        self.messages
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .flat_map(|m| m.tool_calls.iter())
            .any(|c| c.id == call_id)
    }

    pub fn has_result(&self, call_id: &str) -> bool {
        self.messages
            .iter()
            .any(|m| m.role == Role::Tool && m.tool_call_id.as_deref() == Some(call_id))
    }

    /// Every call of the most recent assistant request, answered or not.
    pub fn latest_request_calls(&self) -> &[ToolCall] {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant && m.has_tool_calls())
            .map_or(&[], |m| m.tool_calls.as_slice())
    }

    /// Tool calls of the most recent assistant request that have no result yet.
    pub fn unresolved_calls(&self) -> Vec<ToolCall> {
        self.latest_request_calls()
            .iter()
            .filter(|c| !self.has_result(&c.id))
            .cloned()
            .collect()
    }

    /// Find a call by id among assistant requests.
    pub fn find_call(&self, call_id: &str) -> Option<&ToolCall> {
        self.messages
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .flat_map(|m| m.tool_calls.iter())
            .find(|c| c.id == call_id)
    }

    /// Text of the latest assistant message that has any.
    pub fn last_assistant_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .filter(|m| m.role == Role::Assistant)
            .find_map(Message::text)
    }

    /// Text of the most recent user message.
    pub fn last_user_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .filter(|m| m.role == Role::User)
            .find_map(Message::text)
    }
}
