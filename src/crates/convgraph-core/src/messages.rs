//! Conversation messages and the views nodes get of them
//!
//! Messages live in the `messages` state field as plain JSON objects:
//!
//! ```json
//! {"id": "5f0c...", "role": "assistant", "content": "Refund processed!"}
//! ```
//!
//! Assistant messages may request tool calls, and tool messages answer one
//! call each:
//!
//! ```json
//! {"id": "a1", "role": "assistant", "content": "",
//!  "tool_calls": [{"id": "call_1", "name": "get_weather_info", "args": {"query": "sf"}}]}
//! {"id": "t1", "role": "tool", "content": "It's 60 degrees and foggy.", "tool_call_id": "call_1"}
//! ```
//!
//! [`add_messages`] is the merge rule behind
//! [`AddMessagesReducer`](crate::state::AddMessagesReducer): new ids are
//! appended, known ids are replaced where they stand, so the list never
//! shrinks and never reorders.

use crate::state::{State, MESSAGES};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Author of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// A tool invocation requested by the assistant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Echoed back in the answering tool message's `tool_call_id`
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, args: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            args,
        }
    }
}

/// One conversation turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Stable identity; generated when absent from incoming JSON
    #[serde(default = "new_id")]
    pub id: String,

    pub role: MessageRole,

    pub content: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// Set on tool messages: the call this message answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            role,
            content: content.into(),
            name: None,
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Tool, content)
    }

    /// Tool output answering the call with id `tool_call_id`
    pub fn tool_result(content: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        let mut message = Self::tool(content);
        message.tool_call_id = Some(tool_call_id.into());
        message
    }

    pub fn with_tool_calls(mut self, calls: Vec<ToolCall>) -> Self {
        self.tool_calls = calls;
        self
    }

    /// Assistant message still waiting on tool results
    pub fn has_tool_calls(&self) -> bool {
        self.role == MessageRole::Assistant && !self.tool_calls.is_empty()
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn to_value(&self) -> Value {
        // string keys and JSON args always serialize
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Merge `right` into `left`: replace messages whose id already exists, append the rest
pub fn add_messages(left: Vec<Message>, right: Vec<Message>) -> Vec<Message> {
    let mut merged = left;
    for message in right {
        match merged.iter_mut().find(|existing| existing.id == message.id) {
            Some(existing) => *existing = message,
            None => merged.push(message),
        }
    }
    merged
}

/// How much of the message history a node sees when invoked
///
/// The view only shapes the node's input. The persisted state is untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryView {
    /// Every message in the thread
    #[default]
    Full,

    /// Drop the final message when it was written by the assistant.
    ///
    /// Useful for nodes that are re-invoked after an interrupt and would
    /// otherwise see their own previous reply as the latest turn.
    WithoutTrailingAssistant,
}

impl HistoryView {
    pub fn apply(&self, state: &State) -> State {
        match self {
            Self::Full => state.clone(),
            Self::WithoutTrailingAssistant => {
                let mut view = state.clone();
                if let Some(Value::Array(messages)) = view.get_mut(MESSAGES) {
                    let trailing_assistant = messages
                        .last()
                        .and_then(|last| last.get("role"))
                        .and_then(Value::as_str)
                        == Some(MessageRole::Assistant.as_str());
                    if trailing_assistant {
                        messages.pop();
                    }
                }
                view
            }
        }
    }
}
