//! LLM Agent Runtime Module
//!
//! Turns operator utterances into validated kubectl tool calls and narrates
//! the results, one session at a time.

pub mod conversation;
pub mod provider;
pub mod result;
pub mod runtime;
pub mod safety;
pub mod session;
pub mod templates;
pub mod tools;

pub use conversation::{Conversation, ConversationError, ToolCall, ToolResult, Turn};
pub use provider::{InferenceClient, InferenceError, LLMConfig, ModelResponse};
pub use result::{AnswerKind, FinalAnswer};
pub use runtime::AgentRuntime;
pub use safety::{CommandClass, SafetyConfig, SafetyDecision, SafetyValidator};
pub use session::{ApprovalLedger, Session, SessionLimits};
pub use tools::{Tool, ToolError, ToolRegistry};
