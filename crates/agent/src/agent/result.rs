//! Agent Result Structures
//!
//! What `AgentRuntime::handle` returns for one utterance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::conversation::{ToolCall, ToolResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnswerKind {
    /// The model produced a final text answer.
    Answered,
    /// The round limit was reached first.
    Incomplete,
    /// Inference failed, or the request was cancelled.
    Failed,
}

impl AnswerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnswerKind::Answered => "ANSWERED",
            AnswerKind::Incomplete => "INCOMPLETE",
            AnswerKind::Failed => "FAILED",
        }
    }
}

/// Record of one tool dispatch during the request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionTaken {
    pub tool: String,
    /// The command or action the model asked for.
    pub request: String,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
}

impl ActionTaken {
    pub fn from_call(call: &ToolCall, result: &ToolResult) -> Self {
        let request = call
            .arguments
            .get("command")
            .or_else(|| call.arguments.get("action"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| call.arguments.to_string());
        Self {
            tool: call.tool_name.clone(),
            request,
            timestamp: call.timestamp,
            success: result.success,
            error: result.error.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalAnswer {
    pub kind: AnswerKind,
    pub text: String,
    pub rounds: u32,
    pub actions: Vec<ActionTaken>,
    /// Destructive commands waiting for the operator to say "yes".
    pub pending_confirmations: Vec<String>,
    /// Verbatim provider error for `Failed`.
    pub error: Option<String>,
}

impl FinalAnswer {
    pub fn answered(text: impl Into<String>, rounds: u32, actions: Vec<ActionTaken>) -> Self {
        Self {
            kind: AnswerKind::Answered,
            text: text.into(),
            rounds,
            actions,
            pending_confirmations: Vec::new(),
            error: None,
        }
    }

    pub fn incomplete(text: impl Into<String>, rounds: u32, actions: Vec<ActionTaken>) -> Self {
        Self {
            kind: AnswerKind::Incomplete,
            text: text.into(),
            rounds,
            actions,
            pending_confirmations: Vec::new(),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>, rounds: u32, actions: Vec<ActionTaken>) -> Self {
        let error = error.into();
        Self {
            kind: AnswerKind::Failed,
            text: error.clone(),
            rounds,
            actions,
            pending_confirmations: Vec::new(),
            error: Some(error),
        }
    }

    pub fn with_pending(mut self, pending: Vec<String>) -> Self {
        self.pending_confirmations = pending;
        self
    }

    /// Format as a human-readable report
    pub fn format_report(&self) -> String {
        let mut report = String::new();
        if self.kind != AnswerKind::Answered {
            report.push_str(&format!("[{}] ", self.kind.as_str()));
        }
        report.push_str(self.text.trim_end());

        if !self.pending_confirmations.is_empty() {
            report.push_str("\n\nAwaiting your confirmation:");
            for command in &self.pending_confirmations {
                report.push_str(&format!("\n  • {}", command));
            }
            report.push_str("\nReply \"yes\" to run, or anything else to cancel.");
        }
        report
    }
}
