//! Agent Tools Module
//!
//! Tools the model can call, each declared by a name, a description and an
//! argument schema. The registry validates arguments before any handler runs
//! and turns every outcome, including failures, into a `ToolResult`.

pub mod context;
pub mod kubectl;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::conversation::{ToolCall, ToolResult};
use super::session::Session;
use crate::metrics;

pub use context::KubectlContextTool;
pub use kubectl::RunKubectlTool;

/// Failure taxonomy reported back to the model. `code()` is what lands in
/// `ToolResult::error`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("Invalid arguments: {0}")]
    SchemaViolation(String),
    #[error("Unknown tool '{0}'")]
    UnknownTool(String),
    #[error("Confirmation required: {0}")]
    ConfirmationRequired(String),
    #[error("Command denied: {0}")]
    SafetyDenied(String),
    #[error("Command execution timeout ({0}s)")]
    CommandTimeout(u64),
    #[error("{0}")]
    ExecutionFailure(String),
    #[error("{0}")]
    InvalidCommand(String),
    #[error("Cancelled by operator")]
    Cancelled,
    #[error("Context '{0}' not found")]
    UnknownContext(String),
}

impl ToolError {
    pub fn code(&self) -> &'static str {
        match self {
            ToolError::SchemaViolation(_) => "schema_violation",
            ToolError::UnknownTool(_) => "unknown_tool",
            ToolError::ConfirmationRequired(_) => "confirmation_required",
            ToolError::SafetyDenied(_) => "safety_denied",
            ToolError::CommandTimeout(_) => "command_timeout",
            ToolError::ExecutionFailure(_) => "execution_failure",
            ToolError::InvalidCommand(_) => "invalid_command",
            ToolError::Cancelled => "cancelled",
            ToolError::UnknownContext(_) => "unknown_context",
        }
    }
}

/// What a handler produced: a payload for the model, and the error kind if it failed.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub payload: Value,
    pub error: Option<ToolError>,
}

impl ToolOutcome {
    pub fn ok(payload: Value) -> Self {
        Self { payload, error: None }
    }

    pub fn failed(error: ToolError, payload: Value) -> Self {
        Self {
            payload,
            error: Some(error),
        }
    }

    /// A failure whose payload is just the error itself.
    pub fn error(error: ToolError) -> Self {
        let payload = json!({
            "success": false,
            "error": error.code(),
            "message": error.to_string(),
        });
        Self::failed(error, payload)
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgKind {
    String,
    Integer,
    Number,
    Boolean,
}

impl ArgKind {
    fn matches(&self, value: &Value) -> bool {
        match self {
            ArgKind::String => value.is_string(),
            ArgKind::Integer => value.is_i64() || value.is_u64(),
            ArgKind::Number => value.is_number(),
            ArgKind::Boolean => value.is_boolean(),
        }
    }

    fn json_type(&self) -> &'static str {
        match self {
            ArgKind::String => "string",
            ArgKind::Integer => "integer",
            ArgKind::Number => "number",
            ArgKind::Boolean => "boolean",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArgumentField {
    pub name: &'static str,
    pub kind: ArgKind,
    pub required: bool,
    pub description: &'static str,
    /// Canonical values advertised to the model; empty means any value.
    pub allowed: &'static [&'static str],
    /// Accepted spellings mapped to a canonical value.
    pub value_aliases: &'static [(&'static str, &'static str)],
    /// Alternative key names accepted for this field.
    pub key_aliases: &'static [&'static str],
}

impl ArgumentField {
    pub fn new(name: &'static str, kind: ArgKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required: false,
            description,
            allowed: &[],
            value_aliases: &[],
            key_aliases: &[],
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn one_of(mut self, allowed: &'static [&'static str]) -> Self {
        self.allowed = allowed;
        self
    }

    pub fn value_aliases(mut self, aliases: &'static [(&'static str, &'static str)]) -> Self {
        self.value_aliases = aliases;
        self
    }

    pub fn key_aliases(mut self, aliases: &'static [&'static str]) -> Self {
        self.key_aliases = aliases;
        self
    }
}

/// Declared arguments of a tool: required keys and their types.
#[derive(Debug, Clone, Default)]
pub struct ArgumentSchema {
    pub fields: Vec<ArgumentField>,
}

impl ArgumentSchema {
    pub fn new(fields: Vec<ArgumentField>) -> Self {
        Self { fields }
    }

    /// JSON Schema sent to the model.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for field in &self.fields {
            let mut property = json!({
                "type": field.kind.json_type(),
                "description": field.description,
            });
            if !field.allowed.is_empty() {
                property["enum"] = json!(field.allowed);
            }
            properties.insert(field.name.to_string(), property);
            if field.required {
                required.push(field.name);
            }
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Check `arguments` and return them with aliases resolved to canonical
    /// keys and values. Unknown keys are dropped.
    pub fn validate(&self, arguments: &Value) -> Result<Map<String, Value>, String> {
        let object = match arguments {
            Value::Object(map) => map,
            Value::Null => return self.validate(&Value::Object(Map::new())),
            other => return Err(format!("arguments must be an object, got {}", other)),
        };

        let mut normalized = Map::new();
        for field in &self.fields {
            let value = std::iter::once(field.name)
                .chain(field.key_aliases.iter().copied())
                .find_map(|key| object.get(key).filter(|v| !v.is_null()));

            let Some(value) = value else {
                if field.required {
                    return Err(format!("missing required argument '{}'", field.name));
                }
                continue;
            };

            if !field.kind.matches(value) {
                return Err(format!(
                    "argument '{}' must be a {}",
                    field.name,
                    field.kind.json_type()
                ));
            }

            let value = match value.as_str() {
                Some(text) if !field.allowed.is_empty() => {
                    let canonical = field
                        .value_aliases
                        .iter()
                        .find(|(alias, _)| *alias == text)
                        .map(|(_, canonical)| *canonical)
                        .unwrap_or(text);
                    if !field.allowed.contains(&canonical) {
                        return Err(format!(
                            "argument '{}' must be one of: {}",
                            field.name,
                            field.allowed.join(", ")
                        ));
                    }
                    Value::String(canonical.to_string())
                }
                _ => value.clone(),
            };
            normalized.insert(field.name.to_string(), value);
        }
        Ok(normalized)
    }
}

/// Tool declaration as handed to the inference provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Common trait for all agent tools
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool name
    fn name(&self) -> &str;

    /// Get the tool description for the LLM
    fn description(&self) -> &str;

    fn schema(&self) -> ArgumentSchema;

    /// Run with arguments already validated against `schema()`.
    async fn invoke(&self, arguments: Map<String, Value>, session: &mut Session) -> ToolOutcome;
}

/// Name-to-handler map the reasoning loop dispatches through.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        debug!("Registered tool: {}", tool.name());
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .map(|tool| ToolDefinition {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                input_schema: tool.schema().to_json_schema(),
            })
            .collect()
    }

    /// Validate and run one call. Always returns exactly one result for it.
    pub async fn dispatch(&self, call: &ToolCall, session: &mut Session) -> ToolResult {
        let started = Instant::now();

        let outcome = match self.tools.get(&call.tool_name) {
            None => {
                warn!("Model requested unknown tool '{}'", call.tool_name);
                let error = ToolError::UnknownTool(call.tool_name.clone());
                ToolOutcome::failed(
                    error.clone(),
                    json!({
                        "success": false,
                        "error": error.code(),
                        "message": format!(
                            "{}. Available tools: {}",
                            error,
                            self.names().join(", ")
                        ),
                    }),
                )
            }
            Some(tool) => match tool.schema().validate(&call.arguments) {
                Err(detail) => {
                    warn!("Schema violation calling {}: {}", call.tool_name, detail);
                    ToolOutcome::error(ToolError::SchemaViolation(detail))
                }
                Ok(arguments) => tool.invoke(arguments, session).await,
            },
        };

        let duration = started.elapsed();
        let outcome_label = outcome.error.as_ref().map(ToolError::code).unwrap_or("success");
        metrics::TOOL_CALLS_TOTAL
            .with_label_values(&[call.tool_name.as_str(), outcome_label])
            .inc();
        info!(
            "Tool {} ({}) finished: {} in {:?}",
            call.tool_name, call.call_id, outcome_label, duration
        );

        ToolResult {
            call_id: call.call_id.clone(),
            tool_name: call.tool_name.clone(),
            success: outcome.is_success(),
            output: outcome.payload,
            error: outcome.error.map(|e| e.code().to_string()),
            duration,
        }
    }

    /// Result recorded for a call that was never run because the request was cancelled.
    pub fn cancelled_result(call: &ToolCall) -> ToolResult {
        let outcome = ToolOutcome::error(ToolError::Cancelled);
        ToolResult {
            call_id: call.call_id.clone(),
            tool_name: call.tool_name.clone(),
            success: false,
            output: outcome.payload,
            error: Some(ToolError::Cancelled.code().to_string()),
            duration: std::time::Duration::ZERO,
        }
    }
}
