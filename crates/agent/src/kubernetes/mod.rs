//! Kubectl plumbing: command parsing, process execution, and context tracking.

pub mod command;
pub mod context;
pub mod executor;

pub use command::{CommandParseError, CommandSpec};
pub use context::{ClusterContext, ContextTracker, SwitchOutcome};
pub use executor::{CommandOutput, CommandRunner, ExecutorError, ExitClassification, KubectlExecutor};
