use serde::{Deserialize, Serialize};

use super::tool::ToolCallRequest;

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One turn in the conversation.
///
/// `content` may be empty when the message instead carries tool-call
/// requests; `tool_call_id` is set only on tool-role messages and links the
/// result back to the request that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system<S: Into<String>>(content: S) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user<S: Into<String>>(content: S) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant<S: Into<String>>(content: S) -> Self {
        Self::plain(Role::Assistant, content)
    }

    /// An assistant message that requests tool calls instead of answering.
    pub fn assistant_tool_calls(calls: Vec<ToolCallRequest>) -> Self {
        Message {
            role: Role::Assistant,
            content: String::new(),
            tool_calls: calls,
            tool_call_id: None,
        }
    }

    /// A tool-role message carrying the result for one requested call.
    pub fn tool_result<I: Into<String>, S: Into<String>>(tool_call_id: I, content: S) -> Self {
        Message {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    fn plain<S: Into<String>>(role: Role, content: S) -> Self {
        Message {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

/// Append-only message log for one session. The backing vector is private:
/// nothing can delete or reorder messages mid-session.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
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
}
