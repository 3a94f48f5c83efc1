//! Conversation transcript
//!
//! The ordered record of one session. Tool calls are tracked until their
//! result arrives so that no model or user turn can be appended while a call
//! is still unanswered.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// A tool invocation requested by the model. Immutable once issued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: Value,
    pub timestamp: DateTime<Utc>,
}

impl ToolCall {
    pub fn new(call_id: impl Into<String>, tool_name: impl Into<String>, arguments: Value) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            arguments,
            timestamp: Utc::now(),
        }
    }
}

/// Outcome of exactly one `ToolCall`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub tool_name: String,
    pub success: bool,
    /// Structured payload handed back to the model.
    pub output: Value,
    /// Stable error code when `success` is false.
    pub error: Option<String>,
    pub duration: Duration,
}

impl ToolResult {
    /// The payload as the text a model reads.
    pub fn content(&self) -> String {
        match &self.output {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Turn {
    User {
        content: String,
        timestamp: DateTime<Utc>,
    },
    Model {
        content: String,
        timestamp: DateTime<Utc>,
    },
    ToolCall(ToolCall),
    ToolResult(ToolResult),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConversationError {
    #[error("{} tool call(s) still awaiting a result: {}", .0.len(), .0.join(", "))]
    PendingToolCalls(Vec<String>),
    #[error("No pending tool call with id '{0}'")]
    UnknownCallId(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conversation {
    turns: Vec<Turn>,
    /// Call ids issued but not yet answered, in issue order.
    pending: Vec<String>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn pending_calls(&self) -> &[String] {
        &self.pending
    }

    pub fn clear(&mut self) {
        self.turns.clear();
        self.pending.clear();
    }

    pub fn push_user(&mut self, content: impl Into<String>) -> Result<(), ConversationError> {
        self.ensure_settled()?;
        self.turns.push(Turn::User {
            content: content.into(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    pub fn push_model(&mut self, content: impl Into<String>) -> Result<(), ConversationError> {
        self.ensure_settled()?;
        self.turns.push(Turn::Model {
            content: content.into(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Append the calls of one round, optionally preceded by the model's
    /// narration. Missing or repeated call ids are replaced so every result
    /// can be matched unambiguously. Returns the calls as recorded.
    pub fn push_tool_calls(
        &mut self,
        preamble: Option<String>,
        calls: Vec<ToolCall>,
    ) -> Result<Vec<ToolCall>, ConversationError> {
        self.ensure_settled()?;
        if let Some(text) = preamble.filter(|t| !t.trim().is_empty()) {
            self.push_model(text)?;
        }

        let mut recorded = Vec::with_capacity(calls.len());
        for mut call in calls {
            if call.call_id.is_empty() || self.has_call_id(&call.call_id) {
                call.call_id = format!("call_{}", Uuid::new_v4().simple());
            }
            self.pending.push(call.call_id.clone());
            self.turns.push(Turn::ToolCall(call.clone()));
            recorded.push(call);
        }
        Ok(recorded)
    }

    pub fn push_tool_result(&mut self, result: ToolResult) -> Result<(), ConversationError> {
        let position = self
            .pending
            .iter()
            .position(|id| *id == result.call_id)
            .ok_or_else(|| ConversationError::UnknownCallId(result.call_id.clone()))?;
        self.pending.remove(position);
        self.turns.push(Turn::ToolResult(result));
        Ok(())
    }

    /// Calls still awaiting a result.
    pub fn unanswered(&self) -> Vec<&ToolCall> {
        self.turns
            .iter()
            .filter_map(|turn| match turn {
                Turn::ToolCall(call) if self.pending.contains(&call.call_id) => Some(call),
                _ => None,
            })
            .collect()
    }

    pub fn last_tool_result(&self) -> Option<&ToolResult> {
        self.turns.iter().rev().find_map(|turn| match turn {
            Turn::ToolResult(result) => Some(result),
            _ => None,
        })
    }

    pub fn last_user_message(&self) -> Option<&str> {
        self.turns.iter().rev().find_map(|turn| match turn {
            Turn::User { content, .. } => Some(content.as_str()),
            _ => None,
        })
    }

    fn has_call_id(&self, id: &str) -> bool {
        self.turns
            .iter()
            .any(|turn| matches!(turn, Turn::ToolCall(call) if call.call_id == id))
    }

    fn ensure_settled(&self) -> Result<(), ConversationError> {
        if self.pending.is_empty() {
            Ok(())
        } else {
            Err(ConversationError::PendingToolCalls(self.pending.clone()))
        }
    }
}
