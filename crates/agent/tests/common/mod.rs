#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use kubectl_agent::agent::provider::{InferenceClient, InferenceError, InferenceRequest, ModelResponse};
use kubectl_agent::agent::tools::{KubectlContextTool, RunKubectlTool};
use kubectl_agent::agent::{
    AgentRuntime, SafetyConfig, SafetyValidator, Session, SessionLimits, ToolCall, ToolRegistry, Turn,
};
use kubectl_agent::kubernetes::{
    ClusterContext, CommandOutput, CommandRunner, CommandSpec, ContextTracker, ExecutorError,
    ExitClassification,
};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Replays canned model replies and remembers what it was shown.
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Result<ModelResponse, InferenceError>>>,
    seen: Mutex<Vec<SeenRequest>>,
}

#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub system: String,
    pub turns: Vec<Turn>,
    pub tool_names: Vec<String>,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<Result<ModelResponse, InferenceError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn seen(&self) -> Vec<SeenRequest> {
        self.seen.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait]
impl InferenceClient for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &InferenceRequest<'_>) -> Result<ModelResponse, InferenceError> {
        self.seen.lock().unwrap().push(SeenRequest {
            system: request.system.clone(),
            turns: request.turns.to_vec(),
            tool_names: request.tools.iter().map(|t| t.name.clone()).collect(),
        });
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(ModelResponse::Text("Nothing more to do.".to_string())))
    }
}

pub fn text(reply: &str) -> Result<ModelResponse, InferenceError> {
    Ok(ModelResponse::Text(reply.to_string()))
}

pub fn kubectl(id: &str, command: &str) -> Result<ModelResponse, InferenceError> {
    call(id, "run_kubectl_command", serde_json::json!({ "command": command }))
}

pub fn call(id: &str, tool: &str, arguments: Value) -> Result<ModelResponse, InferenceError> {
    Ok(ModelResponse::ToolCalls {
        preamble: None,
        calls: vec![ToolCall::new(id, tool, arguments)],
    })
}

/// A kubeconfig with a few contexts and canned command output. Every
/// invocation is recorded with the full argument list.
pub struct FakeCluster {
    pub contexts: Vec<String>,
    pub current: String,
    invocations: Mutex<Vec<Vec<String>>>,
}

impl FakeCluster {
    pub fn new(current: &str, contexts: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            contexts: contexts.iter().map(|c| c.to_string()).collect(),
            current: current.to_string(),
            invocations: Mutex::new(Vec::new()),
        })
    }

    pub fn invocations(&self) -> Vec<Vec<String>> {
        self.invocations.lock().unwrap().clone()
    }

    /// Invocations whose verb is `verb`, ignoring an injected `--context`.
    pub fn runs_of(&self, verb: &str) -> Vec<Vec<String>> {
        self.invocations()
            .into_iter()
            .filter(|args| {
                let rest = match args.first().map(String::as_str) {
                    Some("--context") => &args[2.min(args.len())..],
                    _ => &args[..],
                };
                rest.iter().find(|a| !a.starts_with('-')).map(String::as_str) == Some(verb)
            })
            .collect()
    }
}

#[async_trait]
impl CommandRunner for FakeCluster {
    async fn run(
        &self,
        spec: &CommandSpec,
        _timeout: Duration,
        _cancel: &CancellationToken,
    ) -> Result<CommandOutput, ExecutorError> {
        self.invocations.lock().unwrap().push(spec.args.clone());

        let stdout = match (spec.verb.as_str(), spec.subcommand.as_deref()) {
            ("config", Some("get-contexts")) => format!("{}\n", self.contexts.join("\n")),
            ("config", Some("current-context")) => format!("{}\n", self.current),
            ("get", _) => "NAME        READY   STATUS    RESTARTS   AGE\napi-7d9f    1/1     Running   0          2d\n".to_string(),
            ("delete", _) => format!(
                "{} \"{}\" deleted\n",
                spec.resource.clone().unwrap_or_default(),
                spec.name.clone().unwrap_or_default()
            ),
            _ => String::new(),
        };

        Ok(CommandOutput {
            exit: ExitClassification::Exited(0),
            stdout,
            stderr: String::new(),
            duration: Duration::from_millis(5),
            pid: Some(1234),
        })
    }
}

pub struct Harness {
    pub runtime: AgentRuntime,
    pub session: Session,
    pub cluster: Arc<FakeCluster>,
    pub provider: Arc<ScriptedProvider>,
}

pub fn harness(replies: Vec<Result<ModelResponse, InferenceError>>) -> Harness {
    harness_with(replies, SafetyConfig::default(), SessionLimits::default())
}

pub fn harness_with(
    replies: Vec<Result<ModelResponse, InferenceError>>,
    safety: SafetyConfig,
    limits: SessionLimits,
) -> Harness {
    let cluster = FakeCluster::new("dev", &["dev", "prod-context", "staging"]);
    let provider = ScriptedProvider::new(replies);
    let runner: Arc<dyn CommandRunner> = cluster.clone();

    let registry = ToolRegistry::new()
        .with_tool(Arc::new(RunKubectlTool::new(runner.clone(), SafetyValidator::new(safety))))
        .with_tool(Arc::new(KubectlContextTool::new(ContextTracker::new(
            runner,
            Duration::from_secs(5),
        ))));
    let runtime = AgentRuntime::new(provider.clone(), registry).with_retry_backoff(Duration::from_millis(10));
    let session = Session::new(ClusterContext::new("dev"), limits);

    Harness {
        runtime,
        session,
        cluster,
        provider,
    }
}

/// Every ToolCall in the transcript has exactly one ToolResult.
pub fn assert_no_orphans(session: &Session) {
    let turns = session.conversation.turns();
    for turn in turns {
        if let Turn::ToolCall(call) = turn {
            let answers = turns
                .iter()
                .filter(|t| matches!(t, Turn::ToolResult(r) if r.call_id == call.call_id))
                .count();
            assert_eq!(answers, 1, "call {} has {} results", call.call_id, answers);
        }
    }
}
