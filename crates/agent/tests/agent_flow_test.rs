mod common;

use std::collections::BTreeSet;

use common::{assert_no_orphans, call, harness, harness_with, kubectl, text};
use kubectl_agent::agent::provider::{InferenceError, ModelResponse};
use kubectl_agent::agent::{AnswerKind, SafetyConfig, SessionLimits, ToolCall, Turn};
use serde_json::json;

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|a| a.to_string()).collect()
}

fn last_result_error(session: &kubectl_agent::agent::Session) -> Option<String> {
    session.conversation.last_tool_result().and_then(|r| r.error.clone())
}

#[tokio::test]
async fn test_lists_pods_in_another_context() {
    let mut h = harness(vec![
        call("c1", "kubectl_context", json!({"action": "switch", "name": "prod-context"})),
        kubectl("c2", "kubectl get pods -n production"),
        text("One pod, api-7d9f, is running in production."),
    ]);

    let answer = h
        .runtime
        .handle("list pods in production using prod-context", &mut h.session)
        .await;

    assert_eq!(answer.kind, AnswerKind::Answered);
    assert_eq!(answer.rounds, 3);
    assert_eq!(answer.actions.len(), 2);
    assert_eq!(h.session.cluster.active.as_deref(), Some("prod-context"));
    assert_eq!(
        h.cluster.runs_of("get"),
        vec![strings(&["--context", "prod-context", "get", "pods", "-n", "production"])]
    );

    let seen = h.provider.seen();
    assert!(seen[0].system.contains("Active kubectl context: dev"));
    assert!(seen[1].system.contains("Active kubectl context: prod-context"));
    assert_eq!(seen[0].tool_names, vec!["kubectl_context", "run_kubectl_command"]);
    assert_no_orphans(&h.session);
}

#[tokio::test]
async fn test_delete_waits_for_operator_confirmation() {
    let mut h = harness(vec![
        kubectl("d1", "kubectl delete pod nginx"),
        text("Deleting nginx is destructive. Reply yes to confirm."),
        kubectl("d2", "kubectl delete pod nginx"),
        text("Pod nginx deleted."),
    ]);

    let first = h.runtime.handle("delete pod nginx", &mut h.session).await;
    assert_eq!(first.kind, AnswerKind::Answered);
    assert_eq!(first.pending_confirmations, vec!["kubectl --context dev delete pod nginx"]);
    assert!(h.cluster.runs_of("delete").is_empty());
    let held = h
        .session
        .conversation
        .turns()
        .iter()
        .find_map(|t| match t {
            Turn::ToolResult(r) if r.call_id == "d1" => Some(r.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(held.error.as_deref(), Some("confirmation_required"));
    assert_eq!(held.output["confirmation_required"], true);

    let second = h.runtime.handle("yes", &mut h.session).await;
    assert_eq!(second.kind, AnswerKind::Answered);
    assert!(second.pending_confirmations.is_empty());
    assert_eq!(
        h.cluster.runs_of("delete"),
        vec![strings(&["--context", "dev", "delete", "pod", "nginx"])]
    );
    assert_no_orphans(&h.session);
}

#[tokio::test]
async fn test_non_confirmation_withdraws_pending_command() {
    let mut h = harness(vec![
        kubectl("d1", "kubectl delete pod nginx"),
        text("Please confirm."),
        kubectl("d2", "kubectl delete pod nginx"),
        text("Still needs confirmation."),
    ]);

    h.runtime.handle("delete pod nginx", &mut h.session).await;
    let answer = h.runtime.handle("actually, show me its logs first", &mut h.session).await;

    assert!(h.cluster.runs_of("delete").is_empty());
    // The reissued command is held again rather than run.
    assert_eq!(answer.pending_confirmations, vec!["kubectl --context dev delete pod nginx"]);
}

#[tokio::test]
async fn test_approval_covers_one_execution_only() {
    let mut h = harness(vec![
        kubectl("d1", "kubectl delete pod nginx"),
        text("Please confirm."),
        kubectl("d2", "kubectl delete pod nginx"),
        kubectl("d3", "kubectl delete pod nginx"),
        text("Done."),
    ]);

    h.runtime.handle("delete pod nginx", &mut h.session).await;
    let answer = h.runtime.handle("yes, delete it", &mut h.session).await;

    assert_eq!(h.cluster.runs_of("delete").len(), 1);
    assert_eq!(last_result_error(&h.session).as_deref(), Some("confirmation_required"));
    assert_eq!(answer.pending_confirmations, vec!["kubectl --context dev delete pod nginx"]);
}

#[tokio::test]
async fn test_auto_approve_runs_destructive_commands() {
    let safety = SafetyConfig {
        auto_approve: true,
        ..Default::default()
    };
    let mut h = harness_with(
        vec![kubectl("d1", "kubectl delete pod nginx"), text("Deleted.")],
        safety,
        SessionLimits::default(),
    );

    let answer = h.runtime.handle("delete pod nginx", &mut h.session).await;
    assert_eq!(answer.kind, AnswerKind::Answered);
    assert_eq!(h.cluster.runs_of("delete").len(), 1);
}

#[tokio::test]
async fn test_namespace_outside_allow_list_is_denied() {
    let safety = SafetyConfig {
        allowed_namespaces: Some(BTreeSet::from(["staging".to_string()])),
        ..Default::default()
    };
    let mut h = harness_with(
        vec![kubectl("g1", "kubectl get pods -n production"), text("Not allowed.")],
        safety,
        SessionLimits::default(),
    );

    h.runtime.handle("list pods in production", &mut h.session).await;
    assert!(h.cluster.invocations().is_empty());
    assert_eq!(last_result_error(&h.session).as_deref(), Some("safety_denied"));
}

#[tokio::test]
async fn test_shell_operators_never_reach_the_cluster() {
    let mut h = harness(vec![
        kubectl("g1", "kubectl get pods | grep api"),
        text("Pipes are not supported."),
    ]);

    h.runtime.handle("find the api pods", &mut h.session).await;
    assert!(h.cluster.invocations().is_empty());
    assert_eq!(last_result_error(&h.session).as_deref(), Some("safety_denied"));
}

#[tokio::test]
async fn test_non_kubectl_command_is_invalid() {
    let mut h = harness(vec![kubectl("x1", "helm list"), text("Only kubectl is available.")]);

    h.runtime.handle("list helm releases", &mut h.session).await;
    assert!(h.cluster.invocations().is_empty());
    let result = h.session.conversation.last_tool_result().unwrap();
    assert_eq!(result.error.as_deref(), Some("invalid_command"));
    assert_eq!(result.output["error"], "Command must start with 'kubectl'");
}

#[tokio::test]
async fn test_adversarial_model_stops_at_round_limit() {
    let replies = (0..10)
        .map(|i| kubectl(&format!("loop{}", i), "kubectl get pods"))
        .collect();
    let limits = SessionLimits {
        max_rounds: 3,
        ..Default::default()
    };
    let mut h = harness_with(replies, SafetyConfig::default(), limits);

    let answer = h.runtime.handle("keep looking", &mut h.session).await;

    assert_eq!(answer.kind, AnswerKind::Incomplete);
    assert_eq!(answer.rounds, 3);
    assert_eq!(h.provider.calls(), 3);
    assert_eq!(h.cluster.runs_of("get").len(), 3);
    assert!(answer.text.starts_with("Stopped after 3 reasoning round(s)"));
    assert!(answer.text.contains("api-7d9f"));
    assert_no_orphans(&h.session);
}

#[tokio::test]
async fn test_unknown_tool_and_bad_arguments_are_reported_to_the_model() {
    let mut h = harness(vec![
        call("u1", "delete_cluster", json!({})),
        call("s1", "run_kubectl_command", json!({"cmd": "kubectl get pods"})),
        call("s2", "kubectl_context", json!({"action": "teleport"})),
        text("I could not do that."),
    ]);

    let answer = h.runtime.handle("do something odd", &mut h.session).await;
    assert_eq!(answer.kind, AnswerKind::Answered);

    let errors: Vec<Option<String>> = answer.actions.iter().map(|a| a.error.clone()).collect();
    assert_eq!(
        errors,
        vec![
            Some("unknown_tool".to_string()),
            Some("schema_violation".to_string()),
            Some("schema_violation".to_string()),
        ]
    );
    assert!(h.cluster.invocations().is_empty());

    // The model saw each failure before its next turn.
    let seen = h.provider.seen();
    let last_turn = seen[1].turns.last().unwrap();
    assert!(matches!(last_turn, Turn::ToolResult(r) if r.call_id == "u1" && !r.success));
}

#[tokio::test]
async fn test_inference_failure_is_retried_once_then_reported() {
    let mut h = harness(vec![
        Err(InferenceError::RateLimited("slow down".to_string())),
        Err(InferenceError::RateLimited("still throttled".to_string())),
        text("never reached"),
    ]);

    let answer = h.runtime.handle("list pods", &mut h.session).await;

    assert_eq!(answer.kind, AnswerKind::Failed);
    assert_eq!(h.provider.calls(), 2);
    assert_eq!(
        answer.error.as_deref(),
        Some("Inference rate limit exceeded: still throttled")
    );
}

#[tokio::test]
async fn test_inference_recovers_on_retry() {
    let mut h = harness(vec![
        Err(InferenceError::ConnectionFailed("reset by peer".to_string())),
        text("All good."),
    ]);

    let answer = h.runtime.handle("how is the cluster?", &mut h.session).await;
    assert_eq!(answer.kind, AnswerKind::Answered);
    assert_eq!(answer.text, "All good.");
    assert_eq!(h.provider.calls(), 2);
}

#[tokio::test]
async fn test_context_list_switch_round_trip() {
    let mut h = harness(vec![
        call("l1", "kubectl_context", json!({"action": "list"})),
        call("s1", "kubectl_context", json!({"action": "use", "context_name": "staging"})),
        call("c1", "kubectl_context", json!({"action": "get"})),
        call("x1", "kubectl_context", json!({"action": "switch", "name": "nowhere"})),
        text("You are on staging."),
    ]);

    h.runtime.handle("move me to staging", &mut h.session).await;

    let results: Vec<_> = h
        .session
        .conversation
        .turns()
        .iter()
        .filter_map(|t| match t {
            Turn::ToolResult(r) => Some(r.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(results.len(), 4);
    assert_eq!(results[0].output["output"], "* dev\n  prod-context\n  staging");
    assert_eq!(results[1].output["output"], "Switched to context \"staging\".");
    assert_eq!(results[2].output["output"], "staging");
    assert_eq!(results[3].error.as_deref(), Some("unknown_context"));
    assert_eq!(h.session.cluster.active.as_deref(), Some("staging"));
}

#[tokio::test]
async fn test_sessions_do_not_share_context() {
    let mut a = harness(vec![
        call("s1", "kubectl_context", json!({"action": "switch", "name": "staging"})),
        text("Switched."),
    ]);
    let mut b = harness(vec![kubectl("g1", "kubectl get pods"), text("Listed.")]);

    a.runtime.handle("use staging", &mut a.session).await;
    b.runtime.handle("list pods", &mut b.session).await;

    assert_eq!(a.session.cluster.active.as_deref(), Some("staging"));
    assert_eq!(b.session.cluster.active.as_deref(), Some("dev"));
    assert_eq!(b.cluster.runs_of("get"), vec![strings(&["--context", "dev", "get", "pods"])]);
}

#[tokio::test]
async fn test_cancelled_request_fails_without_dispatching() {
    let mut h = harness(vec![kubectl("g1", "kubectl get pods"), text("Listed.")]);

    h.session.cancel_token().cancel();
    let answer = h.runtime.handle("list pods", &mut h.session).await;

    assert_eq!(answer.kind, AnswerKind::Failed);
    assert_eq!(answer.text, "Request cancelled by operator");
    assert!(h.cluster.invocations().is_empty());

    // A fresh token lets the next request through.
    h.session.begin_request();
    let answer = h.runtime.handle("list pods", &mut h.session).await;
    assert_eq!(answer.kind, AnswerKind::Answered);
    assert_no_orphans(&h.session);
}

#[tokio::test]
async fn test_list_pods_with_prod_context_already_active() {
    let mut h = harness(vec![
        kubectl("p1", "kubectl get pods -n production"),
        text("api-7d9f is running in production."),
    ]);
    h.session.cluster = kubectl_agent::kubernetes::ClusterContext::new("prod-context");

    let answer = h
        .runtime
        .handle("list all pods in production namespace", &mut h.session)
        .await;

    assert_eq!(answer.kind, AnswerKind::Answered);
    let kubectl_calls: Vec<_> = h
        .session
        .conversation
        .turns()
        .iter()
        .filter_map(|t| match t {
            Turn::ToolCall(c) if c.tool_name == "run_kubectl_command" => Some(c.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(kubectl_calls.len(), 1);
    let command = kubectl_calls[0].arguments["command"].as_str().unwrap();
    assert!(command.contains("get pods") && command.contains("-n production"));
    assert_eq!(
        h.cluster.runs_of("get"),
        vec![strings(&["--context", "prod-context", "get", "pods", "-n", "production"])]
    );
    let result = h.session.conversation.last_tool_result().unwrap();
    assert!(result.success);
    assert!(result.output["stdout"].as_str().unwrap().contains("api-7d9f"));
}

#[tokio::test]
async fn test_switch_to_active_context_is_idempotent() {
    let mut h = harness(vec![
        call("s1", "kubectl_context", json!({"action": "switch", "name": "dev"})),
        call("s2", "kubectl_context", json!({"action": "switch", "name": "dev"})),
        call("c1", "kubectl_context", json!({"action": "current"})),
        text("Still on dev."),
    ]);

    let answer = h.runtime.handle("switch to dev twice", &mut h.session).await;

    assert!(answer.actions.iter().all(|a| a.success));
    assert_eq!(h.session.cluster.active.as_deref(), Some("dev"));
    let last = h.session.conversation.last_tool_result().unwrap();
    assert_eq!(last.output["output"], "dev");
}

#[tokio::test]
async fn test_approval_is_bound_to_the_context_it_was_given_in() {
    let mut h = harness(vec![
        kubectl("d1", "kubectl delete pod nginx"),
        text("Deleting nginx in dev needs confirmation."),
        call("s1", "kubectl_context", json!({"action": "switch", "name": "prod-context"})),
        kubectl("d2", "kubectl delete pod nginx"),
        text("Deleting in prod-context needs its own confirmation."),
    ]);

    h.runtime.handle("delete pod nginx", &mut h.session).await;
    let answer = h.runtime.handle("yes", &mut h.session).await;

    assert!(h.cluster.runs_of("delete").is_empty());
    assert_eq!(
        answer.pending_confirmations,
        vec!["kubectl --context prod-context delete pod nginx"]
    );
    assert_eq!(last_result_error(&h.session).as_deref(), Some("confirmation_required"));
}

#[tokio::test]
async fn test_destructive_calls_in_one_round_are_held_separately() {
    let both = || {
        Ok(ModelResponse::ToolCalls {
            preamble: Some("Removing both pods.".to_string()),
            calls: vec![
                ToolCall::new("", "run_kubectl_command", json!({"command": "kubectl delete pod web-1"})),
                ToolCall::new("", "run_kubectl_command", json!({"command": "kubectl delete pod web-2"})),
            ],
        })
    };
    let mut h = harness(vec![
        both(),
        text("Both deletions need confirmation."),
        both(),
        text("Both pods deleted."),
    ]);

    let first = h.runtime.handle("delete web-1 and web-2", &mut h.session).await;
    assert_eq!(
        first.pending_confirmations,
        vec![
            "kubectl --context dev delete pod web-1",
            "kubectl --context dev delete pod web-2",
        ]
    );
    assert!(h.cluster.runs_of("delete").is_empty());

    let second = h.runtime.handle("yes", &mut h.session).await;
    assert!(second.pending_confirmations.is_empty());
    assert_eq!(
        h.cluster.runs_of("delete"),
        vec![
            strings(&["--context", "dev", "delete", "pod", "web-1"]),
            strings(&["--context", "dev", "delete", "pod", "web-2"]),
        ]
    );
    assert_no_orphans(&h.session);
}
