//! Command Executor
//!
//! Runs one kubectl invocation as an isolated child process. The executor
//! never interprets output; it only reports how the process ended.

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::command::CommandSpec;

/// How long to wait for the output pipes to drain after the child is gone.
const PIPE_DRAIN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("kubectl command not found. Is kubectl installed and in PATH? ({binary})")]
    NotFound { binary: String },
    #[error("Failed to spawn '{binary}': {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed waiting for child process: {0}")]
    Wait(#[source] std::io::Error),
}

/// How the child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "code", rename_all = "snake_case")]
pub enum ExitClassification {
    Exited(i32),
    /// Killed by the executor after the timeout elapsed.
    TimedOut,
    /// Killed because the session was cancelled.
    Cancelled,
    /// Terminated by a signal the executor did not send.
    Signaled,
}

impl ExitClassification {
    pub fn code(&self) -> Option<i32> {
        match self {
            ExitClassification::Exited(code) => Some(*code),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExitClassification::Exited(0))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOutput {
    pub exit: ExitClassification,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    /// OS process id of the child, while it existed.
    pub pid: Option<u32>,
}

/// Seam between the tools and the process that actually talks to the cluster.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        spec: &CommandSpec,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, ExecutorError>;
}

/// Spawns the kubectl binary directly, without a shell.
#[derive(Debug, Clone)]
pub struct KubectlExecutor {
    binary: String,
}

impl Default for KubectlExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl KubectlExecutor {
    pub fn new() -> Self {
        Self {
            binary: "kubectl".to_string(),
        }
    }

    /// Use a different executable, e.g. a pinned kubectl path.
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    fn spawn(&self, spec: &CommandSpec) -> Result<Child, ExecutorError> {
        Command::new(&self.binary)
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ExecutorError::NotFound {
                        binary: self.binary.clone(),
                    }
                } else {
                    ExecutorError::Spawn {
                        binary: self.binary.clone(),
                        source: e,
                    }
                }
            })
    }
}

#[async_trait]
impl CommandRunner for KubectlExecutor {
    async fn run(
        &self,
        spec: &CommandSpec,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, ExecutorError> {
        let started = Instant::now();
        let mut child = self.spawn(spec)?;
        let pid = child.id();
        debug!("Spawned {} (pid {:?}): {}", self.binary, pid, spec.raw_command);

        let stdout_reader = child.stdout.take().map(drain);
        let stderr_reader = child.stderr.take().map(drain);

        let exit = tokio::select! {
            status = child.wait() => {
                let status = status.map_err(ExecutorError::Wait)?;
                match status.code() {
                    Some(code) => ExitClassification::Exited(code),
                    None => ExitClassification::Signaled,
                }
            }
            _ = tokio::time::sleep(timeout) => {
                warn!("Command timed out after {:?}, killing pid {:?}: {}", timeout, pid, spec.raw_command);
                terminate(&mut child).await?;
                ExitClassification::TimedOut
            }
            _ = cancel.cancelled() => {
                info!("Session cancelled, killing pid {:?}: {}", pid, spec.raw_command);
                terminate(&mut child).await?;
                ExitClassification::Cancelled
            }
        };

        let stdout = collect(stdout_reader).await;
        let stderr = collect(stderr_reader).await;
        let duration = started.elapsed();
        debug!("{} finished with {:?} in {:?}", self.binary, exit, duration);

        Ok(CommandOutput {
            exit,
            stdout,
            stderr,
            duration,
            pid,
        })
    }
}

/// Kill the child and reap it so no process outlives the call.
async fn terminate(child: &mut Child) -> Result<(), ExecutorError> {
    // `kill` sends SIGKILL and then waits; an already-exited child is not an error.
    match child.kill().await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
        Err(e) => Err(ExecutorError::Wait(e)),
    }
}

fn drain<R>(mut pipe: R) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Err(e) = pipe.read_to_end(&mut buf).await {
            warn!("Failed reading command output after {} bytes: {}", buf.len(), e);
        }
        buf
    })
}

async fn collect(reader: Option<JoinHandle<Vec<u8>>>) -> String {
    let Some(handle) = reader else {
        return String::new();
    };
    match tokio::time::timeout(PIPE_DRAIN_GRACE, handle).await {
        Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
        Ok(Err(e)) => {
            warn!("Output reader task failed: {}", e);
            String::new()
        }
        Err(_) => {
            // A grandchild can keep the pipe open after the child is gone.
            warn!("Timed out draining child output");
            String::new()
        }
    }
}
