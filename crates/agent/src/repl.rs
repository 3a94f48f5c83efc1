//! Interactive Read-Eval-Print Loop
//!
//! Reads operator requests line by line, hands each to the runtime and prints
//! the answer. Ctrl-C while a request is running cancels it; Ctrl-C at the
//! prompt ends the session.

use std::io::Write;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info, warn};

use crate::agent::{AgentRuntime, AnswerKind, FinalAnswer, Session};
use crate::metrics;

pub const PROMPT: &str = "⎈ kubectl> ";

const SEPARATOR_WIDTH: usize = 70;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Exit,
    Help,
    Metrics,
    Reset,
    Blank,
    Request(String),
}

impl ReplCommand {
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        match trimmed.to_lowercase().as_str() {
            "" => ReplCommand::Blank,
            "exit" | "quit" | "q" => ReplCommand::Exit,
            "help" => ReplCommand::Help,
            "metrics" => ReplCommand::Metrics,
            "reset" => ReplCommand::Reset,
            _ => ReplCommand::Request(trimmed.to_string()),
        }
    }
}

pub fn banner() -> String {
    let rule = "=".repeat(SEPARATOR_WIDTH);
    let mut text = String::new();
    text.push_str(&format!("\n{}\n", rule));
    text.push_str("⎈  kubectl agent: ask about your cluster in plain language\n");
    text.push_str(&format!("{}\n", rule));
    text.push_str("\nTry asking:\n");
    let sections: [(&str, &[&str]); 4] = [
        (
            "Workloads",
            &[
                "Show the pods in the production namespace",
                "Which deployments are running in staging?",
                "Describe the node worker-1",
            ],
        ),
        (
            "Troubleshooting",
            &[
                "Why does the checkout pod keep restarting?",
                "Show me the last 50 log lines of api-server",
                "Any warning events in kube-system?",
            ],
        ),
        (
            "Contexts",
            &[
                "Which context am I using?",
                "List my contexts",
                "Switch to the staging context",
            ],
        ),
        (
            "Changes (asks before anything destructive)",
            &[
                "Scale the web deployment to 5 replicas",
                "Delete the pod nginx",
            ],
        ),
    ];
    for (title, samples) in sections {
        text.push_str(&format!("\n  {}:\n", title));
        for sample in samples {
            text.push_str(&format!("    • {}\n", sample));
        }
    }
    text.push_str(
        "\nCommands: 'exit', 'quit', 'q' end the session | 'help' shows this menu | \
         'metrics' prints counters | 'reset' clears the conversation\n",
    );
    text.push_str(&format!("{}\n", rule));
    text
}

/// Render one answer between separators.
pub fn render_answer(answer: &FinalAnswer) -> String {
    let rule = "─".repeat(SEPARATOR_WIDTH);
    let mut header = answer.kind.as_str().to_string();
    if answer.rounds > 0 {
        header.push_str(&format!(
            " · {} round(s), {} action(s)",
            answer.rounds,
            answer.actions.len()
        ));
    }
    format!("{}\n{}\n{}\n{}\n", rule, header, answer.format_report(), rule)
}

/// Drive the loop until exit, EOF, or Ctrl-C at the prompt.
pub async fn run<R, W>(
    runtime: &AgentRuntime,
    session: &mut Session,
    input: R,
    out: &mut W,
) -> crate::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut lines = input.lines();
    writeln!(out, "{}", banner())?;
    writeln!(out, "{}\n", session.cluster.summary())?;

    loop {
        write!(out, "{}", PROMPT)?;
        out.flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                writeln!(out)?;
                info!("Interrupted at prompt, ending session {}", session.id);
                None
            }
        };
        let Some(line) = line else {
            writeln!(out, "\nGoodbye!")?;
            return Ok(());
        };

        match ReplCommand::parse(&line) {
            ReplCommand::Blank => continue,
            ReplCommand::Exit => {
                writeln!(out, "Goodbye!")?;
                return Ok(());
            }
            ReplCommand::Help => writeln!(out, "{}", banner())?,
            ReplCommand::Metrics => match metrics::gather_metrics() {
                Ok(text) => writeln!(out, "{}", text)?,
                Err(e) => warn!("Could not gather metrics: {}", e),
            },
            ReplCommand::Reset => {
                session.reset();
                writeln!(out, "Conversation cleared.\n")?;
            }
            ReplCommand::Request(utterance) => {
                writeln!(out, "\n⏳ Working on it...\n")?;
                out.flush()?;
                let answer = handle_interruptible(runtime, session, &utterance).await;
                if answer.kind == AnswerKind::Failed {
                    debug!("Request failed: {:?}", answer.error);
                }
                writeln!(out, "{}", render_answer(&answer))?;
            }
        }
    }
}

async fn handle_interruptible(runtime: &AgentRuntime, session: &mut Session, utterance: &str) -> FinalAnswer {
    let cancel = session.begin_request();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl-C received, cancelling the running request");
                cancel.cancel();
            }
        })
    };
    let answer = runtime.handle(utterance, session).await;
    watcher.abort();
    answer
}
