//! Agent Runtime
//!
//! The reasoning loop: one utterance in, one `FinalAnswer` out. Each round
//! sends the transcript to the model and either finishes on a text answer or
//! dispatches the requested tool calls in order and goes around again, up to
//! the session's round limit.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::conversation::Turn;
use super::provider::{InferenceClient, InferenceError, InferenceRequest, ModelResponse};
use super::result::{ActionTaken, AnswerKind, FinalAnswer};
use super::session::Session;
use super::templates;
use super::tools::ToolRegistry;
use crate::metrics;

/// One call plus one re-attempt.
const MAX_INFERENCE_ATTEMPTS: u32 = 2;
const DEFAULT_INFERENCE_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(500);
const CANCELLED_MESSAGE: &str = "Request cancelled by operator";
/// How much of the last tool output an incomplete answer quotes.
const SUMMARY_EXCERPT_CHARS: usize = 600;

/// Agent runtime for handling operator requests
#[derive(Clone)]
pub struct AgentRuntime {
    client: Arc<dyn InferenceClient>,
    registry: ToolRegistry,
    inference_timeout: Duration,
    retry_backoff: Duration,
}

impl AgentRuntime {
    pub fn new(client: Arc<dyn InferenceClient>, registry: ToolRegistry) -> Self {
        Self {
            client,
            registry,
            inference_timeout: DEFAULT_INFERENCE_TIMEOUT,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }

    pub fn with_inference_timeout(mut self, timeout: Duration) -> Self {
        self.inference_timeout = timeout;
        self
    }

    /// Base delay before the re-attempt of a failed inference call.
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn provider_name(&self) -> &str {
        self.client.name()
    }

    /// Handle one operator utterance to completion.
    pub async fn handle(&self, utterance: &str, session: &mut Session) -> FinalAnswer {
        let cancel = session.cancel_token();
        info!("Session {}: handling utterance ({} chars)", session.id, utterance.len());

        session.approvals.begin_utterance(utterance);
        let answer = self.run(utterance, session, &cancel).await;
        session.approvals.end_utterance();

        let outcome = match answer.kind {
            AnswerKind::Answered => "answered",
            AnswerKind::Incomplete => "incomplete",
            AnswerKind::Failed => "failed",
        };
        metrics::SESSIONS_TOTAL.with_label_values(&[outcome]).inc();
        info!(
            "Session {}: {} after {} round(s), {} tool call(s)",
            session.id,
            answer.kind.as_str(),
            answer.rounds,
            answer.actions.len()
        );

        answer.with_pending(session.approvals.pending().to_vec())
    }

    async fn run(&self, utterance: &str, session: &mut Session, cancel: &CancellationToken) -> FinalAnswer {
        self.settle_unanswered(session);
        if let Err(e) = session.conversation.push_user(utterance) {
            error!("Transcript rejected user message: {}", e);
            return FinalAnswer::failed(e.to_string(), 0, Vec::new());
        }

        let definitions = self.registry.definitions();
        let max_rounds = session.limits.max_rounds;
        let mut actions: Vec<ActionTaken> = Vec::new();

        for round in 1..=max_rounds {
            if cancel.is_cancelled() {
                return FinalAnswer::failed(CANCELLED_MESSAGE, round - 1, actions);
            }
            debug!("Round {}/{} starting", round, max_rounds);

            let response = {
                let request = InferenceRequest {
                    system: templates::system_prompt(&session.cluster),
                    turns: session.conversation.turns(),
                    tools: &definitions,
                };
                self.infer(&request, cancel).await
            };

            let (preamble, calls) = match response {
                Err(InferenceError::Cancelled) => {
                    return FinalAnswer::failed(CANCELLED_MESSAGE, round, actions);
                }
                Err(e) => {
                    error!("Inference failed in round {}: {}", round, e);
                    return FinalAnswer::failed(e.to_string(), round, actions);
                }
                Ok(ModelResponse::Text(text)) => {
                    if let Err(e) = session.conversation.push_model(text.clone()) {
                        return FinalAnswer::failed(e.to_string(), round, actions);
                    }
                    return FinalAnswer::answered(text, round, actions);
                }
                Ok(ModelResponse::ToolCalls { preamble, calls }) if calls.is_empty() => {
                    let text = preamble.unwrap_or_default();
                    if text.trim().is_empty() {
                        return FinalAnswer::failed(
                            InferenceError::ParseError("model returned an empty response".to_string())
                                .to_string(),
                            round,
                            actions,
                        );
                    }
                    if let Err(e) = session.conversation.push_model(text.clone()) {
                        return FinalAnswer::failed(e.to_string(), round, actions);
                    }
                    return FinalAnswer::answered(text, round, actions);
                }
                Ok(ModelResponse::ToolCalls { preamble, calls }) => (preamble, calls),
            };

            let calls = match session.conversation.push_tool_calls(preamble, calls) {
                Ok(calls) => calls,
                Err(e) => return FinalAnswer::failed(e.to_string(), round, actions),
            };
            debug!("Round {}: dispatching {} tool call(s)", round, calls.len());

            for call in &calls {
                let result = if cancel.is_cancelled() {
                    ToolRegistry::cancelled_result(call)
                } else {
                    self.registry.dispatch(call, session).await
                };
                actions.push(ActionTaken::from_call(call, &result));
                if let Err(e) = session.conversation.push_tool_result(result) {
                    error!("Transcript rejected tool result: {}", e);
                    return FinalAnswer::failed(e.to_string(), round, actions);
                }
            }

            if cancel.is_cancelled() {
                return FinalAnswer::failed(CANCELLED_MESSAGE, round, actions);
            }
        }

        warn!("Round limit of {} reached without a final answer", max_rounds);
        let summary = incomplete_summary(max_rounds, &actions, session.conversation.turns());
        FinalAnswer::incomplete(summary, max_rounds, actions)
    }

    /// One inference call with a single backed-off re-attempt.
    async fn infer(
        &self,
        request: &InferenceRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<ModelResponse, InferenceError> {
        let mut backoff = self.retry_backoff;
        let mut attempt = 1;
        loop {
            let result = tokio::select! {
                outcome = tokio::time::timeout(self.inference_timeout, self.client.complete(request)) => {
                    outcome.unwrap_or(Err(InferenceError::Timeout(self.inference_timeout.as_secs())))
                }
                _ = cancel.cancelled() => Err(InferenceError::Cancelled),
            };

            match result {
                Ok(response) => {
                    metrics::INFERENCE_REQUESTS_TOTAL.with_label_values(&["success"]).inc();
                    return Ok(response);
                }
                Err(InferenceError::Cancelled) => {
                    metrics::INFERENCE_REQUESTS_TOTAL.with_label_values(&["cancelled"]).inc();
                    return Err(InferenceError::Cancelled);
                }
                Err(e) if attempt < MAX_INFERENCE_ATTEMPTS => {
                    metrics::INFERENCE_REQUESTS_TOTAL.with_label_values(&["retry"]).inc();
                    warn!(
                        "{} inference attempt {} failed: {}; retrying in {:?}",
                        self.client.name(),
                        attempt,
                        e,
                        backoff
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = cancel.cancelled() => return Err(InferenceError::Cancelled),
                    }
                    backoff *= 2;
                    attempt += 1;
                }
                Err(e) => {
                    metrics::INFERENCE_REQUESTS_TOTAL.with_label_values(&["error"]).inc();
                    return Err(e);
                }
            }
        }
    }

    /// Close out calls left unanswered by an earlier interrupted request.
    fn settle_unanswered(&self, session: &mut Session) {
        let orphans: Vec<_> = session
            .conversation
            .unanswered()
            .into_iter()
            .map(ToolRegistry::cancelled_result)
            .collect();
        for result in orphans {
            warn!("Closing unanswered tool call {}", result.call_id);
            if let Err(e) = session.conversation.push_tool_result(result) {
                error!("Could not close unanswered tool call: {}", e);
            }
        }
    }
}

fn incomplete_summary(max_rounds: u32, actions: &[ActionTaken], turns: &[Turn]) -> String {
    let mut summary = format!(
        "Stopped after {} reasoning round(s) without a final answer.",
        max_rounds
    );

    if !actions.is_empty() {
        summary.push_str("\nSteps taken:");
        for action in actions {
            let status = match &action.error {
                None => "ok".to_string(),
                Some(code) => code.clone(),
            };
            summary.push_str(&format!("\n  - {} `{}` ({})", action.tool, action.request, status));
        }
    }

    let last_result = turns.iter().rev().find_map(|turn| match turn {
        Turn::ToolResult(result) => Some(result),
        _ => None,
    });
    if let Some(result) = last_result {
        let content = result.content();
        let excerpt: String = content.chars().take(SUMMARY_EXCERPT_CHARS).collect();
        summary.push_str(&format!("\nLast result: {}", excerpt));
        if content.chars().count() > SUMMARY_EXCERPT_CHARS {
            summary.push_str(" …");
        }
    }
    summary
}
