//! Per-session state
//!
//! Everything one operator's conversation owns: the transcript, the cluster
//! context it targets, outstanding destructive-command approvals and the
//! cancellation token for the request in flight. Nothing here is shared
//! between sessions.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use super::conversation::Conversation;
use crate::kubernetes::ClusterContext;

/// Phrases that count as an explicit go-ahead from the operator.
const CONFIRMATION_PHRASES: &[&str] = &[
    "yes",
    "y",
    "confirm",
    "confirmed",
    "approve",
    "approved",
    "go ahead",
    "proceed",
    "do it",
];

/// Immutable limits for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionLimits {
    pub max_rounds: u32,
    pub max_command_timeout: Duration,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_rounds: 10,
            max_command_timeout: Duration::from_secs(30),
        }
    }
}

/// True when `utterance` explicitly confirms, e.g. "yes" or "go ahead, delete it".
pub fn is_confirmation(utterance: &str) -> bool {
    let text = utterance
        .trim()
        .trim_end_matches(|c: char| c.is_ascii_punctuation())
        .to_lowercase();

    CONFIRMATION_PHRASES.iter().any(|phrase| match text.strip_prefix(phrase) {
        Some(rest) => rest.chars().next().map_or(true, |c| !c.is_alphanumeric()),
        None => false,
    })
}

/// Destructive commands awaiting, or holding, operator approval.
///
/// Commands are keyed by their whitespace-normalized text. Approval can only
/// come from a user utterance, lasts for that utterance, and each approval
/// covers one execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalLedger {
    pending: Vec<String>,
    approved: Vec<String>,
}

impl ApprovalLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a command that needs confirmation.
    pub fn request(&mut self, command: &str) {
        if !self.pending.iter().any(|c| c == command) {
            self.pending.push(command.to_string());
        }
    }

    pub fn pending(&self) -> &[String] {
        &self.pending
    }

    pub fn approved(&self) -> &[String] {
        &self.approved
    }

    /// Apply a new user utterance: a confirmation approves everything pending,
    /// anything else withdraws it. Returns the number of commands approved.
    pub fn begin_utterance(&mut self, utterance: &str) -> usize {
        self.approved.clear();
        if self.pending.is_empty() {
            return 0;
        }
        if is_confirmation(utterance) {
            self.approved = std::mem::take(&mut self.pending);
            info!("Operator approved {} pending command(s)", self.approved.len());
        } else {
            debug!("Discarding {} unconfirmed command(s)", self.pending.len());
            self.pending.clear();
        }
        self.approved.len()
    }

    /// Use up the approval for `command`, if one exists.
    pub fn consume(&mut self, command: &str) -> bool {
        match self.approved.iter().position(|c| c == command) {
            Some(index) => {
                self.approved.remove(index);
                true
            }
            None => false,
        }
    }

    /// Approvals never outlive the utterance that granted them.
    pub fn end_utterance(&mut self) {
        self.approved.clear();
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.approved.clear();
    }
}

#[derive(Debug)]
pub struct Session {
    pub id: Uuid,
    pub conversation: Conversation,
    pub cluster: ClusterContext,
    pub approvals: ApprovalLedger,
    pub limits: SessionLimits,
    cancel: CancellationToken,
}

impl Session {
    pub fn new(cluster: ClusterContext, limits: SessionLimits) -> Self {
        Self {
            id: Uuid::new_v4(),
            conversation: Conversation::new(),
            cluster,
            approvals: ApprovalLedger::new(),
            limits,
            cancel: CancellationToken::new(),
        }
    }

    /// Token observed by the request in flight.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Hand out a fresh token for the next request, replacing a cancelled one.
    pub fn begin_request(&mut self) -> CancellationToken {
        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }
        self.cancel.clone()
    }

    /// Drop the transcript and approvals but keep the cluster selection.
    pub fn reset(&mut self) {
        self.conversation.clear();
        self.approvals.clear();
        info!("Session {} reset", self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confirmation_phrases() {
        for text in ["yes", "Yes!", "y", "yes, delete it", "go ahead", "Proceed.", "do it now", "approve"] {
            assert!(is_confirmation(text), "{}", text);
        }
        for text in ["no", "yesterday's pods", "why", "delete the nginx pod", "", "maybe yes"] {
            assert!(!is_confirmation(text), "{}", text);
        }
    }

    #[test]
    fn test_confirmation_approves_pending_for_one_use() {
        let mut ledger = ApprovalLedger::new();
        ledger.request("kubectl delete pod nginx");
        ledger.request("kubectl delete pod nginx");
        assert_eq!(ledger.pending().len(), 1);

        assert_eq!(ledger.begin_utterance("yes"), 1);
        assert!(ledger.pending().is_empty());
        assert!(ledger.consume("kubectl delete pod nginx"));
        assert!(!ledger.consume("kubectl delete pod nginx"));
    }

    #[test]
    fn test_other_utterance_discards_pending() {
        let mut ledger = ApprovalLedger::new();
        ledger.request("kubectl delete pod nginx");
        assert_eq!(ledger.begin_utterance("actually, show me the logs"), 0);
        assert!(ledger.pending().is_empty());
        assert!(!ledger.consume("kubectl delete pod nginx"));
    }

    #[test]
    fn test_approval_expires_with_the_utterance() {
        let mut ledger = ApprovalLedger::new();
        ledger.request("kubectl drain node-1");
        ledger.begin_utterance("confirm");
        ledger.end_utterance();
        assert!(!ledger.consume("kubectl drain node-1"));
    }

    #[test]
    fn test_confirmation_without_pending_approves_nothing() {
        let mut ledger = ApprovalLedger::new();
        assert_eq!(ledger.begin_utterance("yes"), 0);
        assert!(!ledger.consume("kubectl delete pod nginx"));
    }

    #[test]
    fn test_begin_request_replaces_cancelled_token() {
        let mut session = Session::new(ClusterContext::new("prod"), SessionLimits::default());
        let first = session.begin_request();
        first.cancel();
        let second = session.begin_request();
        assert!(!second.is_cancelled());
        assert!(!session.cancel_token().is_cancelled());
    }
}
