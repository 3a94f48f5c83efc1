//! LLM Provider Abstraction
//!
//! The reasoning loop talks to a model through `InferenceClient`. Whatever
//! shape a provider's wire format has, a reply comes back as the closed
//! `ModelResponse` variant.

pub mod anthropic;
pub mod bedrock;
pub mod mock;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::conversation::{ToolCall, Turn};
use super::tools::ToolDefinition;

pub use anthropic::AnthropicProvider;
pub use bedrock::BedrockProvider;
pub use mock::MockProvider;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InferenceError {
    #[error("Cannot connect to inference endpoint: {0}")]
    ConnectionFailed(String),
    #[error("Authentication with the inference provider failed: {0}")]
    AuthFailed(String),
    #[error("Inference rate limit exceeded: {0}")]
    RateLimited(String),
    #[error("Inference request timed out after {0}s")]
    Timeout(u64),
    #[error("Model API error: {0}")]
    ApiError(String),
    #[error("Could not interpret model response: {0}")]
    ParseError(String),
    #[error("Inference cancelled")]
    Cancelled,
    #[error("Invalid provider configuration: {0}")]
    Config(String),
}

impl From<reqwest::Error> for InferenceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            InferenceError::ConnectionFailed(format!("request timed out: {}", err))
        } else if err.is_connect() {
            InferenceError::ConnectionFailed(err.to_string())
        } else if err.is_decode() {
            InferenceError::ParseError(err.to_string())
        } else {
            InferenceError::ApiError(err.to_string())
        }
    }
}

/// A model reply, closed over the two shapes the loop understands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum ModelResponse {
    Text(String),
    ToolCalls {
        /// Narration the model emitted alongside its calls.
        preamble: Option<String>,
        calls: Vec<ToolCall>,
    },
}

/// Everything a provider needs for one call.
#[derive(Debug, Clone)]
pub struct InferenceRequest<'a> {
    pub system: String,
    pub turns: &'a [Turn],
    pub tools: &'a [ToolDefinition],
}

/// Trait for LLM providers that support structured tool calls
#[async_trait]
pub trait InferenceClient: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, request: &InferenceRequest<'_>) -> Result<ModelResponse, InferenceError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    pub provider: String,
    pub model: String,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: u32,
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            provider: "bedrock".to_string(),
            model: bedrock::DEFAULT_MODEL_ID.to_string(),
            region: Some(bedrock::DEFAULT_REGION.to_string()),
            endpoint: None,
            api_key: None,
            temperature: None,
            max_tokens: 4096,
        }
    }
}

/// Create a provider from configuration
pub async fn create_provider(config: &LLMConfig) -> Result<Arc<dyn InferenceClient>, InferenceError> {
    match config.provider.as_str() {
        "bedrock" => Ok(Arc::new(BedrockProvider::connect(config).await?)),
        "anthropic" | "claude" => Ok(Arc::new(AnthropicProvider::new(config)?)),
        "mock" => Ok(Arc::new(MockProvider::new())),
        other => Err(InferenceError::Config(format!(
            "unknown provider '{}', expected bedrock, anthropic or mock",
            other
        ))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

/// Provider-neutral content block.
#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Text(String),
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        id: String,
        content: String,
        is_error: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub role: Role,
    pub blocks: Vec<Block>,
}

/// Fold the transcript into strictly alternating user/assistant messages.
/// Tool calls belong to the assistant, tool results to the user.
pub fn group_turns(turns: &[Turn]) -> Vec<Message> {
    let mut messages: Vec<Message> = Vec::new();
    for turn in turns {
        let (role, block) = match turn {
            Turn::User { content, .. } if !content.trim().is_empty() => {
                (Role::User, Block::Text(content.clone()))
            }
            Turn::Model { content, .. } if !content.trim().is_empty() => {
                (Role::Assistant, Block::Text(content.clone()))
            }
            Turn::User { .. } | Turn::Model { .. } => continue,
            Turn::ToolCall(call) => (
                Role::Assistant,
                Block::ToolUse {
                    id: call.call_id.clone(),
                    name: call.tool_name.clone(),
                    input: call.arguments.clone(),
                },
            ),
            Turn::ToolResult(result) => (
                Role::User,
                Block::ToolResult {
                    id: result.call_id.clone(),
                    content: result.content(),
                    is_error: !result.success,
                },
            ),
        };

        match messages.last_mut() {
            Some(last) if last.role == role => last.blocks.push(block),
            _ => messages.push(Message {
                role,
                blocks: vec![block],
            }),
        }
    }
    messages
}
