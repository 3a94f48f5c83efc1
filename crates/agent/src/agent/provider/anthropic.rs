//! Anthropic Messages API provider.
//!
//! Default endpoint: https://api.anthropic.com/v1

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{
    group_turns, Block, InferenceClient, InferenceError, InferenceRequest, LLMConfig, ModelResponse,
    Role,
};
use crate::agent::conversation::ToolCall;

/// Anthropic API version header value
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub const DEFAULT_ENDPOINT: &str = "https://api.anthropic.com/v1";
pub const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";

pub struct AnthropicProvider {
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
    max_tokens: u32,
    temperature: Option<f32>,
}

impl AnthropicProvider {
    pub fn new(config: &LLMConfig) -> Result<Self, InferenceError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| InferenceError::AuthFailed("ANTHROPIC_API_KEY is not set".to_string()))?;

        Ok(Self {
            client: Client::new(),
            endpoint: config
                .endpoint
                .clone()
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            model: config.model.clone(),
            api_key,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint.trim_end_matches('/'), path)
    }

    fn headers(&self) -> Result<HeaderMap, InferenceError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.api_key)
                .map_err(|_| InferenceError::Config("API key contains invalid characters".to_string()))?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static(ANTHROPIC_VERSION));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: Vec<WireBlock>,
}

#[derive(Debug, Serialize)]
struct WireTool<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a Value,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        is_error: bool,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<WireBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

fn to_wire(block: Block) -> WireBlock {
    match block {
        Block::Text(text) => WireBlock::Text { text },
        Block::ToolUse { id, name, input } => WireBlock::ToolUse { id, name, input },
        Block::ToolResult {
            id,
            content,
            is_error,
        } => WireBlock::ToolResult {
            tool_use_id: id,
            content,
            is_error,
        },
    }
}

fn from_wire(content: Vec<WireBlock>) -> Result<ModelResponse, InferenceError> {
    let mut text = Vec::new();
    let mut calls = Vec::new();
    for block in content {
        match block {
            WireBlock::Text { text: t } => text.push(t),
            WireBlock::ToolUse { id, name, input } => calls.push(ToolCall::new(id, name, input)),
            WireBlock::ToolResult { .. } | WireBlock::Other => {}
        }
    }

    let text = text.join("\n");
    if calls.is_empty() {
        if text.trim().is_empty() {
            return Err(InferenceError::ParseError(
                "response contained neither text nor tool calls".to_string(),
            ));
        }
        return Ok(ModelResponse::Text(text));
    }
    Ok(ModelResponse::ToolCalls {
        preamble: Some(text).filter(|t| !t.trim().is_empty()),
        calls,
    })
}

#[async_trait]
impl InferenceClient for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(&self, request: &InferenceRequest<'_>) -> Result<ModelResponse, InferenceError> {
        let messages = group_turns(request.turns)
            .into_iter()
            .map(|message| WireMessage {
                role: match message.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                },
                content: message.blocks.into_iter().map(to_wire).collect(),
            })
            .collect();

        let body = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            system: &request.system,
            messages,
            tools: request
                .tools
                .iter()
                .map(|tool| WireTool {
                    name: &tool.name,
                    description: &tool.description,
                    input_schema: &tool.input_schema,
                })
                .collect(),
            temperature: self.temperature,
        };

        let response = self
            .client
            .post(self.api_url("/messages"))
            .headers(self.headers()?)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if let Ok(error) = serde_json::from_str::<ApiError>(&body) {
                let detail = error.error;
                if status.as_u16() == 401 || detail.error_type == "authentication_error" {
                    return Err(InferenceError::AuthFailed(detail.message));
                }
                if status.as_u16() == 429 || detail.error_type == "rate_limit_error" {
                    return Err(InferenceError::RateLimited(detail.message));
                }
                return Err(InferenceError::ApiError(detail.message));
            }
            return Err(InferenceError::ApiError(format!(
                "Anthropic API error ({}): {}",
                status, body
            )));
        }

        let parsed: MessagesResponse = response.json().await?;
        debug!("Anthropic stop reason: {:?}", parsed.stop_reason);
        from_wire(parsed.content)
    }
}
