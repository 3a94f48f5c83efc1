//! Offline provider for demos and tests.
//!
//! Maps a handful of common phrasings to tool calls and summarizes tool
//! results verbatim. It never needs network access or credentials.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Value};

use super::{InferenceClient, InferenceError, InferenceRequest, ModelResponse};
use crate::agent::conversation::{ToolCall, ToolResult, Turn};
use crate::agent::session::is_confirmation;
use crate::agent::tools::{context, kubectl};

lazy_static! {
    static ref NAMESPACE: Regex =
        Regex::new(r"(?:in|from) (?:the )?([a-z0-9][a-z0-9-]*) namespace|(?:namespace|-n) ([a-z0-9][a-z0-9-]*)")
            .unwrap();
    static ref SWITCH: Regex =
        Regex::new(r"(?:switch|change|use)(?: to)?(?: the)? (?:context )?([A-Za-z0-9][A-Za-z0-9_.:@/-]*)(?: context| cluster)?$")
            .unwrap();
    static ref DELETE: Regex =
        Regex::new(r"delete (?:the )?(?:pod )?([a-z0-9][a-z0-9.-]*)(?: pod)?").unwrap();
    static ref LOGS: Regex =
        Regex::new(r"logs? (?:for|of|from) (?:the )?(?:pod )?([a-z0-9][a-z0-9.-]*)").unwrap();
    static ref DESCRIBE: Regex =
        Regex::new(r"describe (?:the )?(pod|deployment|service|node) ([a-z0-9][a-z0-9.-]*)").unwrap();
    static ref LIST: Regex =
        Regex::new(r"(?:list|show|get)(?: me)?(?: all)?(?: the)? (pods|deployments|services|nodes|namespaces|events)")
            .unwrap();
}

pub struct MockProvider {
    next_id: AtomicU64,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
        }
    }

    fn call(&self, tool: &str, arguments: Value) -> ModelResponse {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        ModelResponse::ToolCalls {
            preamble: None,
            calls: vec![ToolCall::new(format!("mock_{}", id), tool, arguments)],
        }
    }

    fn kubectl(&self, command: String) -> ModelResponse {
        self.call(kubectl::TOOL_NAME, json!({ "command": command }))
    }

    fn respond_to_utterance(&self, utterance: &str, turns: &[Turn]) -> ModelResponse {
        let text = utterance.trim().to_lowercase();

        if is_confirmation(&text) {
            return match last_confirmation_request(turns) {
                Some(command) => self.kubectl(command),
                None => ModelResponse::Text("There is nothing waiting for confirmation.".to_string()),
            };
        }

        if text.contains("context") || text.contains("cluster") {
            if text.contains("list") || text.contains("available") || text.contains("all") {
                return self.call(context::TOOL_NAME, json!({"action": "list"}));
            }
            if let Some(name) = SWITCH.captures(utterance.trim()).and_then(|c| c.get(1)) {
                return self.call(
                    context::TOOL_NAME,
                    json!({"action": "switch", "name": name.as_str()}),
                );
            }
            return self.call(context::TOOL_NAME, json!({"action": "current"}));
        }

        let namespace = namespace_flag(&text);

        if let Some(caps) = DELETE.captures(&text) {
            return self.kubectl(format!("kubectl delete pod {}{}", &caps[1], namespace));
        }
        if let Some(caps) = LOGS.captures(&text) {
            return self.kubectl(format!("kubectl logs {}{} --tail=100", &caps[1], namespace));
        }
        if let Some(caps) = DESCRIBE.captures(&text) {
            return self.kubectl(format!("kubectl describe {} {}{}", &caps[1], &caps[2], namespace));
        }
        if let Some(caps) = LIST.captures(&text) {
            let resource = &caps[1];
            let scope = if matches!(resource, "nodes" | "namespaces") { "" } else { namespace.as_str() };
            return self.kubectl(format!("kubectl get {}{}", resource, scope));
        }

        ModelResponse::Text(
            "I can list resources, describe them, fetch logs and manage contexts. \
Try \"list all pods in production namespace\"."
                .to_string(),
        )
    }
}

fn namespace_flag(text: &str) -> String {
    if text.contains("all namespaces") {
        return " -A".to_string();
    }
    NAMESPACE
        .captures(text)
        .and_then(|c| c.get(1).or_else(|| c.get(2)))
        .map(|m| format!(" -n {}", m.as_str()))
        .unwrap_or_default()
}

/// The command of the most recent result that asked for confirmation.
fn last_confirmation_request(turns: &[Turn]) -> Option<String> {
    turns.iter().rev().find_map(|turn| match turn {
        Turn::ToolResult(result) if result.error.as_deref() == Some("confirmation_required") => {
            result.output["command"].as_str().map(str::to_string)
        }
        _ => None,
    })
}

fn summarize(results: &[&ToolResult]) -> String {
    results
        .iter()
        .map(|result| {
            let output = &result.output;
            match result.error.as_deref() {
                None if result.tool_name == kubectl::TOOL_NAME => format!(
                    "Output of `{}`:\n```\n{}\n```",
                    output["command"].as_str().unwrap_or_default(),
                    output["stdout"].as_str().unwrap_or_default().trim_end()
                ),
                None => output["output"]
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| output.to_string()),
                Some("confirmation_required") => format!(
                    "`{}` is destructive. Reply \"yes\" to run it.",
                    output["command"].as_str().unwrap_or_default()
                ),
                Some(code) => format!(
                    "The request failed ({}): {}",
                    code,
                    output["error"]
                        .as_str()
                        .or_else(|| output["message"].as_str())
                        .unwrap_or_default()
                ),
            }
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[async_trait]
impl InferenceClient for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, request: &InferenceRequest<'_>) -> Result<ModelResponse, InferenceError> {
        let trailing_results: Vec<&ToolResult> = request
            .turns
            .iter()
            .rev()
            .map_while(|turn| match turn {
                Turn::ToolResult(result) => Some(Some(result)),
                Turn::ToolCall(_) => Some(None),
                _ => None,
            })
            .flatten()
            .collect();

        if !trailing_results.is_empty() {
            let mut ordered = trailing_results;
            ordered.reverse();
            return Ok(ModelResponse::Text(summarize(&ordered)));
        }

        match request.turns.last() {
            Some(Turn::User { content, .. }) => Ok(self.respond_to_utterance(content, request.turns)),
            _ => Err(InferenceError::ParseError(
                "mock provider expects the transcript to end with a user message".to_string(),
            )),
        }
    }
}
