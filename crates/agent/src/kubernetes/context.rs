//! Context Tracker
//!
//! Answers "which cluster am I talking to", "what else is there" and "switch to X"
//! for one session. The session's choice lives in `ClusterContext` and is applied
//! to each command with `--context`, so the shared kubeconfig is never rewritten
//! and concurrent sessions cannot see each other's switches.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::command::CommandSpec;
use super::executor::CommandRunner;
use crate::{Error, Result};

const LIST_CONTEXTS: &str = "kubectl config get-contexts -o name";
const CURRENT_CONTEXT: &str = "kubectl config current-context";

/// Per-session cluster selection. Single writer: the `ContextTracker`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterContext {
    /// Context every command of this session targets.
    pub active: Option<String>,
    /// Names seen on the most recent listing, for prompt enrichment only.
    pub available: BTreeSet<String>,
}

impl ClusterContext {
    pub fn new(active: impl Into<String>) -> Self {
        Self {
            active: Some(active.into()),
            available: BTreeSet::new(),
        }
    }

    /// One-paragraph description handed to the model each round.
    pub fn summary(&self) -> String {
        let active = self.active.as_deref().unwrap_or("(unknown)");
        if self.available.is_empty() {
            format!("Active kubectl context: {}", active)
        } else {
            let names: Vec<&str> = self.available.iter().map(String::as_str).collect();
            format!(
                "Active kubectl context: {}\nAvailable contexts: {}",
                active,
                names.join(", ")
            )
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchOutcome {
    Ok,
    UnknownContext,
}

/// Wraps kubeconfig queries, always asking kubectl afresh.
#[derive(Clone)]
pub struct ContextTracker {
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
}

impl ContextTracker {
    pub fn new(runner: Arc<dyn CommandRunner>, timeout: Duration) -> Self {
        Self { runner, timeout }
    }

    /// All context names in the kubeconfig.
    pub async fn list(
        &self,
        context: &mut ClusterContext,
        cancel: &CancellationToken,
    ) -> Result<BTreeSet<String>> {
        let stdout = self.query(LIST_CONTEXTS, cancel).await?;
        let names: BTreeSet<String> = stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        debug!("Listed {} kubectl contexts", names.len());
        context.available = names.clone();
        Ok(names)
    }

    /// Select `name` for this session if it exists.
    pub async fn switch(
        &self,
        context: &mut ClusterContext,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<SwitchOutcome> {
        let names = self.list(context, cancel).await?;
        if !names.contains(name) {
            info!("Refusing switch to unknown context '{}'", name);
            return Ok(SwitchOutcome::UnknownContext);
        }
        if context.active.as_deref() != Some(name) {
            info!("Switching session context to '{}'", name);
        }
        context.active = Some(name.to_string());
        Ok(SwitchOutcome::Ok)
    }

    /// The session's active context, or the kubeconfig default when none is pinned yet.
    pub async fn current(
        &self,
        context: &ClusterContext,
        cancel: &CancellationToken,
    ) -> Result<String> {
        match &context.active {
            Some(name) => Ok(name.clone()),
            None => self.kubeconfig_current(cancel).await,
        }
    }

    /// Ask kubeconfig for its current-context.
    pub async fn kubeconfig_current(&self, cancel: &CancellationToken) -> Result<String> {
        let name = self.query(CURRENT_CONTEXT, cancel).await?.trim().to_string();
        if name.is_empty() {
            return Err(Error::Kubernetes("kubeconfig has no current context".to_string()));
        }
        Ok(name)
    }

    async fn query(&self, command: &str, cancel: &CancellationToken) -> Result<String> {
        let spec = CommandSpec::parse(command)
            .map_err(|e| Error::Internal(format!("bad built-in command '{}': {}", command, e)))?;
        let output = self
            .runner
            .run(&spec, self.timeout, cancel)
            .await
            .map_err(|e| Error::Kubernetes(e.to_string()))?;

        if !output.exit.is_success() {
            let detail = if output.stderr.trim().is_empty() {
                format!("{:?}", output.exit)
            } else {
                output.stderr.trim().to_string()
            };
            return Err(Error::Kubernetes(format!("'{}' failed: {}", command, detail)));
        }
        Ok(output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kubernetes::executor::{CommandOutput, ExitClassification, MockCommandRunner};

    fn output(stdout: &str) -> CommandOutput {
        CommandOutput {
            exit: ExitClassification::Exited(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
            duration: Duration::from_millis(5),
            pid: None,
        }
    }

    fn tracker_listing(names: &'static str) -> ContextTracker {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|spec, _, _| spec.subcommand.as_deref() == Some("get-contexts"))
            .returning(move |_, _, _| Ok(output(names)));
        ContextTracker::new(Arc::new(runner), Duration::from_secs(10))
    }

    #[tokio::test]
    async fn test_list_parses_names_and_records_them() {
        let tracker = tracker_listing("prod-context\nstaging\n\n");
        let mut ctx = ClusterContext::new("prod-context");
        let names = tracker.list(&mut ctx, &CancellationToken::new()).await.unwrap();
        assert_eq!(names.len(), 2);
        assert!(names.contains("staging"));
        assert_eq!(ctx.available, names);
    }

    #[tokio::test]
    async fn test_switch_to_unknown_context_leaves_active_unchanged() {
        let tracker = tracker_listing("prod-context\nstaging\n");
        let mut ctx = ClusterContext::new("prod-context");
        let outcome = tracker
            .switch(&mut ctx, "qa", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, SwitchOutcome::UnknownContext);
        assert_eq!(ctx.active.as_deref(), Some("prod-context"));
    }

    #[tokio::test]
    async fn test_switch_is_idempotent() {
        let tracker = tracker_listing("prod-context\nstaging\n");
        let cancel = CancellationToken::new();
        let mut ctx = ClusterContext::new("staging");

        for _ in 0..2 {
            let outcome = tracker.switch(&mut ctx, "staging", &cancel).await.unwrap();
            assert_eq!(outcome, SwitchOutcome::Ok);
            assert_eq!(tracker.current(&ctx, &cancel).await.unwrap(), "staging");
        }
    }

    #[tokio::test]
    async fn test_list_queries_fresh_every_time() {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().times(2).returning(|_, _, _| Ok(output("a\nb\n")));
        let tracker = ContextTracker::new(Arc::new(runner), Duration::from_secs(10));
        let mut ctx = ClusterContext::default();
        let cancel = CancellationToken::new();
        tracker.list(&mut ctx, &cancel).await.unwrap();
        tracker.list(&mut ctx, &cancel).await.unwrap();
    }

    #[tokio::test]
    async fn test_current_falls_back_to_kubeconfig() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|spec, _, _| spec.subcommand.as_deref() == Some("current-context"))
            .times(1)
            .returning(|_, _, _| Ok(output("prod-context\n")));
        let tracker = ContextTracker::new(Arc::new(runner), Duration::from_secs(10));
        let ctx = ClusterContext::default();
        let current = tracker.current(&ctx, &CancellationToken::new()).await.unwrap();
        assert_eq!(current, "prod-context");
    }

    #[tokio::test]
    async fn test_failed_query_surfaces_stderr() {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().returning(|_, _, _| {
            Ok(CommandOutput {
                exit: ExitClassification::Exited(1),
                stdout: String::new(),
                stderr: "error: current-context is not set\n".to_string(),
                duration: Duration::from_millis(5),
                pid: None,
            })
        });
        let tracker = ContextTracker::new(Arc::new(runner), Duration::from_secs(10));
        let err = tracker
            .kubeconfig_current(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("current-context is not set"));
    }

    #[test]
    fn test_summary_mentions_active_and_available() {
        let mut ctx = ClusterContext::new("prod-context");
        assert_eq!(ctx.summary(), "Active kubectl context: prod-context");
        ctx.available.insert("staging".to_string());
        ctx.available.insert("prod-context".to_string());
        assert!(ctx.summary().contains("Available contexts: prod-context, staging"));
    }
}
