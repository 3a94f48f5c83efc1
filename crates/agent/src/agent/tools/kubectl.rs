//! Kubectl Tool for Kubernetes Operations
//!
//! `run_kubectl_command`: parse, pin to the session's context, pass through the
//! safety validator, then execute.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use super::{ArgKind, ArgumentField, ArgumentSchema, Tool, ToolError, ToolOutcome};
use crate::agent::safety::{CommandClass, SafetyDecision, SafetyValidator};
use crate::agent::session::Session;
use crate::kubernetes::{CommandOutput, CommandRunner, CommandSpec, ExitClassification};
use crate::metrics;

pub const TOOL_NAME: &str = "run_kubectl_command";

const DESCRIPTION: &str = "Execute a kubectl command against the active Kubernetes context. \
The command must start with 'kubectl' and is run without a shell, so pipes and redirects are not available. \
Destructive commands (delete, drain, cordon, forced operations) are held until the operator confirms.";

/// Kubectl tool for Kubernetes operations
#[derive(Clone)]
pub struct RunKubectlTool {
    runner: Arc<dyn CommandRunner>,
    validator: SafetyValidator,
}

impl RunKubectlTool {
    pub fn new(runner: Arc<dyn CommandRunner>, validator: SafetyValidator) -> Self {
        Self { runner, validator }
    }

    async fn execute(
        &self,
        command: &str,
        spec: &CommandSpec,
        class: CommandClass,
        session: &Session,
    ) -> ToolOutcome {
        metrics::COMMANDS_TOTAL
            .with_label_values(&[class.as_str()])
            .inc();
        let timeout = session.limits.max_command_timeout;
        let cancel = session.cancel_token();

        let output = match self.runner.run(spec, timeout, &cancel).await {
            Ok(output) => output,
            Err(e) => {
                warn!("Failed to run '{}': {}", command, e);
                let error = ToolError::ExecutionFailure(e.to_string());
                return ToolOutcome::failed(error.clone(), failure_payload(command, &error));
            }
        };

        let mut payload = command_payload(command, &output);
        payload["classification"] = json!(class.as_str());

        let error = match output.exit {
            ExitClassification::Exited(0) => None,
            ExitClassification::Exited(code) => Some(ToolError::ExecutionFailure(
                first_non_empty(&output.stderr, &format!("Command exited with code {}", code)),
            )),
            ExitClassification::TimedOut => Some(ToolError::CommandTimeout(timeout.as_secs())),
            ExitClassification::Cancelled => Some(ToolError::Cancelled),
            ExitClassification::Signaled => Some(ToolError::ExecutionFailure(
                "Command was terminated by a signal".to_string(),
            )),
        };

        match error {
            None => ToolOutcome::ok(payload),
            Some(error) => {
                payload["error"] = json!(error.to_string());
                ToolOutcome::failed(error, payload)
            }
        }
    }
}

#[async_trait]
impl Tool for RunKubectlTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        DESCRIPTION
    }

    fn schema(&self) -> ArgumentSchema {
        ArgumentSchema::new(vec![ArgumentField::new(
            "command",
            ArgKind::String,
            "The full kubectl command, e.g. 'kubectl get pods -n production'",
        )
        .required()])
    }

    async fn invoke(&self, arguments: Map<String, Value>, session: &mut Session) -> ToolOutcome {
        let command = arguments
            .get("command")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string();

        let parsed = match CommandSpec::parse(&command) {
            Ok(spec) => spec,
            Err(e) => {
                let error = ToolError::InvalidCommand(e.to_string());
                return ToolOutcome::failed(error.clone(), failure_payload(&command, &error));
            }
        };

        let spec = match session.cluster.active.as_deref() {
            Some(context) => parsed.with_context(context),
            None => parsed,
        };
        let approval_key = spec.effective_command();

        let class = match self.validator.validate(&spec) {
            SafetyDecision::Allow { class } => class,
            SafetyDecision::Deny { reason } => {
                let error = ToolError::SafetyDenied(reason);
                return ToolOutcome::failed(error.clone(), failure_payload(&command, &error));
            }
            SafetyDecision::ConfirmRequired { class, reason } => {
                if session.approvals.consume(&approval_key) {
                    info!("Running operator-approved command: {}", approval_key);
                    class
                } else {
                    session.approvals.request(&approval_key);
                    let error = ToolError::ConfirmationRequired(reason);
                    let mut payload = failure_payload(&command, &error);
                    payload["classification"] = json!(class.as_str());
                    payload["confirmation_required"] = json!(true);
                    payload["message"] = json!(
                        "Not executed. Ask the operator to confirm; once they reply 'yes', issue the identical command again."
                    );
                    return ToolOutcome::failed(error, payload);
                }
            }
        };

        debug!("Executing {} command: {}", class, spec.raw_command);
        self.execute(&command, &spec, class, session).await
    }
}

/// The fields every `run_kubectl_command` result carries.
fn command_payload(command: &str, output: &CommandOutput) -> Value {
    json!({
        "command": command,
        "return_code": output.exit.code().unwrap_or(-1),
        "stdout": output.stdout,
        "stderr": output.stderr,
        "success": output.exit.is_success(),
        "output_format": if serde_json::from_str::<Value>(&output.stdout).is_ok() { "json" } else { "text" },
    })
}

fn failure_payload(command: &str, error: &ToolError) -> Value {
    json!({
        "command": command,
        "return_code": -1,
        "stdout": "",
        "stderr": "",
        "success": false,
        "error": error.to_string(),
    })
}

fn first_non_empty(preferred: &str, fallback: &str) -> String {
    let trimmed = preferred.trim();
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed.to_string()
    }
}
