//! AWS Bedrock provider using the Converse API.

use std::collections::HashMap;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::provider::ProvideCredentials;
use aws_sdk_bedrockruntime::config::Region;
use aws_sdk_bedrockruntime::error::{DisplayErrorContext, SdkError};
use aws_sdk_bedrockruntime::types::{
    ContentBlock, ConversationRole, ConverseOutput, InferenceConfiguration, Message as BedrockMessage,
    SystemContentBlock, Tool, ToolConfiguration, ToolInputSchema, ToolResultBlock,
    ToolResultContentBlock, ToolResultStatus, ToolSpecification, ToolUseBlock,
};
use aws_sdk_bedrockruntime::Client;
use aws_smithy_types::{Document, Number};
use serde_json::Value;
use tracing::{debug, info};

use super::{
    group_turns, Block, InferenceClient, InferenceError, InferenceRequest, LLMConfig, ModelResponse,
    Role,
};
use crate::agent::conversation::ToolCall;

pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_MODEL_ID: &str = "apac.anthropic.claude-3-5-sonnet-20241022-v2:0";

pub struct BedrockProvider {
    client: Client,
    model_id: String,
    max_tokens: u32,
    temperature: Option<f32>,
}

impl BedrockProvider {
    /// Load the AWS configuration chain and make sure credentials resolve.
    pub async fn connect(config: &LLMConfig) -> Result<Self, InferenceError> {
        let region = config
            .region
            .clone()
            .unwrap_or_else(|| DEFAULT_REGION.to_string());

        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.clone()))
            .load()
            .await;

        let credentials = sdk_config.credentials_provider().ok_or_else(|| {
            InferenceError::AuthFailed("no AWS credentials provider is configured".to_string())
        })?;
        credentials
            .provide_credentials()
            .await
            .map_err(|e| InferenceError::AuthFailed(format!("AWS credentials did not resolve: {}", e)))?;

        info!("Using Bedrock model {} in {}", config.model, region);
        Ok(Self {
            client: Client::new(&sdk_config),
            model_id: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    fn tool_config(request: &InferenceRequest<'_>) -> Result<Option<ToolConfiguration>, InferenceError> {
        if request.tools.is_empty() {
            return Ok(None);
        }
        let tools = request
            .tools
            .iter()
            .map(|tool| {
                ToolSpecification::builder()
                    .name(&tool.name)
                    .description(&tool.description)
                    .input_schema(ToolInputSchema::Json(to_document(&tool.input_schema)))
                    .build()
                    .map(Tool::ToolSpec)
                    .map_err(build_error)
            })
            .collect::<Result<Vec<_>, _>>()?;

        ToolConfiguration::builder()
            .set_tools(Some(tools))
            .build()
            .map(Some)
            .map_err(build_error)
    }
}

fn build_error(err: aws_sdk_bedrockruntime::error::BuildError) -> InferenceError {
    InferenceError::Config(format!("invalid Bedrock request: {}", err))
}

fn to_bedrock_messages(request: &InferenceRequest<'_>) -> Result<Vec<BedrockMessage>, InferenceError> {
    group_turns(request.turns)
        .into_iter()
        .map(|message| {
            let role = match message.role {
                Role::User => ConversationRole::User,
                Role::Assistant => ConversationRole::Assistant,
            };
            let content = message
                .blocks
                .into_iter()
                .map(to_content_block)
                .collect::<Result<Vec<_>, _>>()?;
            BedrockMessage::builder()
                .role(role)
                .set_content(Some(content))
                .build()
                .map_err(build_error)
        })
        .collect()
}

fn to_content_block(block: Block) -> Result<ContentBlock, InferenceError> {
    match block {
        Block::Text(text) => Ok(ContentBlock::Text(text)),
        Block::ToolUse { id, name, input } => ToolUseBlock::builder()
            .tool_use_id(id)
            .name(name)
            .input(to_document(&input))
            .build()
            .map(ContentBlock::ToolUse)
            .map_err(build_error),
        Block::ToolResult {
            id,
            content,
            is_error,
        } => ToolResultBlock::builder()
            .tool_use_id(id)
            .content(ToolResultContentBlock::Text(content))
            .status(if is_error {
                ToolResultStatus::Error
            } else {
                ToolResultStatus::Success
            })
            .build()
            .map(ContentBlock::ToolResult)
            .map_err(build_error),
    }
}

pub(crate) fn to_document(value: &Value) -> Document {
    match value {
        Value::Null => Document::Null,
        Value::Bool(b) => Document::Bool(*b),
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                Document::Number(Number::PosInt(u))
            } else if let Some(i) = n.as_i64() {
                Document::Number(Number::NegInt(i))
            } else {
                Document::Number(Number::Float(n.as_f64().unwrap_or_default()))
            }
        }
        Value::String(s) => Document::String(s.clone()),
        Value::Array(items) => Document::Array(items.iter().map(to_document).collect()),
        Value::Object(map) => Document::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), to_document(v)))
                .collect::<HashMap<_, _>>(),
        ),
    }
}

pub(crate) fn from_document(doc: &Document) -> Value {
    match doc {
        Document::Null => Value::Null,
        Document::Bool(b) => Value::Bool(*b),
        Document::Number(Number::PosInt(u)) => Value::from(*u),
        Document::Number(Number::NegInt(i)) => Value::from(*i),
        Document::Number(Number::Float(f)) => serde_json::Number::from_f64(*f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Document::String(s) => Value::String(s.clone()),
        Document::Array(items) => Value::Array(items.iter().map(from_document).collect()),
        Document::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), from_document(v)))
                .collect(),
        ),
    }
}

fn from_output(output: Option<&ConverseOutput>) -> Result<ModelResponse, InferenceError> {
    let message = match output {
        Some(ConverseOutput::Message(message)) => message,
        _ => {
            return Err(InferenceError::ParseError(
                "Bedrock response carried no message".to_string(),
            ))
        }
    };

    let mut text = Vec::new();
    let mut calls = Vec::new();
    for block in message.content() {
        #[allow(unreachable_patterns)]
        match block {
            ContentBlock::Text(t) => text.push(t.clone()),
            ContentBlock::ToolUse(tool_use) => calls.push(ToolCall::new(
                tool_use.tool_use_id(),
                tool_use.name(),
                from_document(tool_use.input()),
            )),
            _ => {}
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

fn map_sdk_error<E, R>(err: SdkError<E, R>) -> InferenceError
where
    E: std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let detail = DisplayErrorContext(&err).to_string();
    match err {
        SdkError::TimeoutError(_) => InferenceError::ConnectionFailed(detail),
        SdkError::DispatchFailure(_) => InferenceError::ConnectionFailed(detail),
        _ => {
            let lowered = detail.to_lowercase();
            if lowered.contains("accessdenied")
                || lowered.contains("unrecognizedclient")
                || lowered.contains("expiredtoken")
                || lowered.contains("credentials")
            {
                InferenceError::AuthFailed(detail)
            } else if lowered.contains("throttling") {
                InferenceError::RateLimited(detail)
            } else {
                InferenceError::ApiError(detail)
            }
        }
    }
}

#[async_trait]
impl InferenceClient for BedrockProvider {
    fn name(&self) -> &str {
        "bedrock"
    }

    async fn complete(&self, request: &InferenceRequest<'_>) -> Result<ModelResponse, InferenceError> {
        let messages = to_bedrock_messages(request)?;
        let inference = InferenceConfiguration::builder()
            .max_tokens(i32::try_from(self.max_tokens).unwrap_or(i32::MAX))
            .set_temperature(self.temperature)
            .build();

        let response = self
            .client
            .converse()
            .model_id(&self.model_id)
            .system(SystemContentBlock::Text(request.system.clone()))
            .set_messages(Some(messages))
            .set_tool_config(Self::tool_config(request)?)
            .inference_config(inference)
            .send()
            .await
            .map_err(map_sdk_error)?;

        debug!("Bedrock stop reason: {:?}", response.stop_reason());
        from_output(response.output())
    }
}
