//! `kubectl_context`: list, inspect and switch the session's cluster context.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::warn;

use super::{ArgKind, ArgumentField, ArgumentSchema, Tool, ToolError, ToolOutcome};
use crate::agent::session::Session;
use crate::kubernetes::{ContextTracker, SwitchOutcome};

pub const TOOL_NAME: &str = "kubectl_context";

const ACTIONS: &[&str] = &["list", "switch", "current"];
const ACTION_ALIASES: &[(&str, &str)] = &[("get", "current"), ("use", "switch")];

#[derive(Clone)]
pub struct KubectlContextTool {
    tracker: ContextTracker,
}

impl KubectlContextTool {
    pub fn new(tracker: ContextTracker) -> Self {
        Self { tracker }
    }

    async fn list(&self, session: &mut Session) -> Result<String, ToolError> {
        let cancel = session.cancel_token();
        let names = self
            .tracker
            .list(&mut session.cluster, &cancel)
            .await
            .map_err(|e| failure(e, &cancel))?;

        let active = session.cluster.active.as_deref();
        Ok(names
            .iter()
            .map(|name| {
                if Some(name.as_str()) == active {
                    format!("* {}", name)
                } else {
                    format!("  {}", name)
                }
            })
            .collect::<Vec<_>>()
            .join("\n"))
    }

    async fn switch(&self, session: &mut Session, name: &str) -> Result<String, ToolError> {
        let cancel = session.cancel_token();
        let outcome = self
            .tracker
            .switch(&mut session.cluster, name, &cancel)
            .await
            .map_err(|e| failure(e, &cancel))?;

        match outcome {
            SwitchOutcome::Ok => Ok(format!("Switched to context \"{}\".", name)),
            SwitchOutcome::UnknownContext => Err(ToolError::UnknownContext(name.to_string())),
        }
    }

    async fn current(&self, session: &mut Session) -> Result<String, ToolError> {
        let cancel = session.cancel_token();
        self.tracker
            .current(&session.cluster, &cancel)
            .await
            .map_err(|e| failure(e, &cancel))
    }
}

fn failure(error: crate::Error, cancel: &tokio_util::sync::CancellationToken) -> ToolError {
    if cancel.is_cancelled() {
        ToolError::Cancelled
    } else {
        warn!("Context query failed: {}", error);
        ToolError::ExecutionFailure(error.to_string())
    }
}

#[async_trait]
impl Tool for KubectlContextTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "Manage the kubectl context for this session: 'list' shows every context (active one marked with '*'), \
'current' shows the active context, 'switch' selects another context by name."
    }

    fn schema(&self) -> ArgumentSchema {
        ArgumentSchema::new(vec![
            ArgumentField::new("action", ArgKind::String, "One of: list, switch, current")
                .required()
                .one_of(ACTIONS)
                .value_aliases(ACTION_ALIASES),
            ArgumentField::new("name", ArgKind::String, "Context name, required for 'switch'")
                .key_aliases(&["context_name"]),
        ])
    }

    async fn invoke(&self, arguments: Map<String, Value>, session: &mut Session) -> ToolOutcome {
        let action = arguments
            .get("action")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let name = arguments
            .get("name")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|n| !n.is_empty());

        let result = match (action.as_str(), name) {
            ("list", _) => self.list(session).await,
            ("current", _) => self.current(session).await,
            ("switch", Some(name)) => self.switch(session, name).await,
            ("switch", None) => Err(ToolError::SchemaViolation(
                "'name' is required for action 'switch'".to_string(),
            )),
            (other, _) => Err(ToolError::SchemaViolation(format!(
                "unknown action '{}', expected one of: {}",
                other,
                ACTIONS.join(", ")
            ))),
        };

        match result {
            Ok(output) => ToolOutcome::ok(json!({
                "action": action,
                "success": true,
                "output": output,
            })),
            Err(error) => {
                let mut message = error.to_string();
                if let ToolError::UnknownContext(_) = error {
                    let known: Vec<&str> = session.cluster.available.iter().map(String::as_str).collect();
                    message = format!("{}. Available contexts: {}", message, known.join(", "));
                }
                let payload = json!({
                    "action": action,
                    "success": false,
                    "output": "",
                    "error": message,
                });
                ToolOutcome::failed(error, payload)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::conversation::ToolCall;
    use crate::agent::session::SessionLimits;
    use crate::agent::tools::ToolRegistry;
    use crate::kubernetes::executor::{CommandOutput, ExitClassification, MockCommandRunner};
    use crate::kubernetes::ClusterContext;
    use std::sync::Arc;
    use std::time::Duration;

    fn registry() -> ToolRegistry {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().returning(|_, _, _| {
            Ok(CommandOutput {
                exit: ExitClassification::Exited(0),
                stdout: "prod-context\nstaging\n".to_string(),
                stderr: String::new(),
                duration: Duration::from_millis(2),
                pid: None,
            })
        });
        let tracker = ContextTracker::new(Arc::new(runner), Duration::from_secs(10));
        ToolRegistry::new().with_tool(Arc::new(KubectlContextTool::new(tracker)))
    }

    fn session() -> Session {
        Session::new(ClusterContext::new("prod-context"), SessionLimits::default())
    }

    async fn call(registry: &ToolRegistry, session: &mut Session, arguments: Value) -> crate::agent::conversation::ToolResult {
        registry
            .dispatch(&ToolCall::new("c", TOOL_NAME, arguments), session)
            .await
    }

    #[tokio::test]
    async fn test_list_marks_active_context() {
        let registry = registry();
        let mut session = session();
        let result = call(&registry, &mut session, json!({"action": "list"})).await;
        assert!(result.success);
        assert_eq!(result.output["action"], "list");
        assert_eq!(result.output["output"], "* prod-context\n  staging");
    }

    #[tokio::test]
    async fn test_switch_then_current_round_trip() {
        let registry = registry();
        let mut session = session();
        let result = call(&registry, &mut session, json!({"action": "switch", "name": "staging"})).await;
        assert!(result.success);
        assert_eq!(session.cluster.active.as_deref(), Some("staging"));

        let result = call(&registry, &mut session, json!({"action": "get"})).await;
        assert_eq!(result.output["action"], "current");
        assert_eq!(result.output["output"], "staging");
    }

    #[tokio::test]
    async fn test_switch_accepts_context_name_and_use_alias() {
        let registry = registry();
        let mut session = session();
        let result = call(&registry, &mut session, json!({"action": "use", "context_name": "staging"})).await;
        assert!(result.success);
        assert_eq!(session.cluster.active.as_deref(), Some("staging"));
    }

    #[tokio::test]
    async fn test_switch_to_unknown_context() {
        let registry = registry();
        let mut session = session();
        let result = call(&registry, &mut session, json!({"action": "switch", "name": "qa"})).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("unknown_context"));
        assert!(result.output["error"].as_str().unwrap().contains("prod-context, staging"));
        assert_eq!(session.cluster.active.as_deref(), Some("prod-context"));
    }

    #[tokio::test]
    async fn test_switch_without_name_is_schema_violation() {
        let registry = registry();
        let mut session = session();
        let result = call(&registry, &mut session, json!({"action": "switch"})).await;
        assert_eq!(result.error.as_deref(), Some("schema_violation"));

        let result = call(&registry, &mut session, json!({"action": "delete"})).await;
        assert_eq!(result.error.as_deref(), Some("schema_violation"));
    }
}
