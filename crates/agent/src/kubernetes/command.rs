//! Kubectl Command Parsing
//!
//! Turns the raw command string emitted by the model into a `CommandSpec`
//! that the safety validator and the executor both consume.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Global or per-verb flags that consume the following token as their value.
const VALUE_FLAGS: &[&str] = &[
    "-n",
    "--namespace",
    "--context",
    "--kubeconfig",
    "--cluster",
    "--user",
    "-s",
    "--server",
    "--request-timeout",
    "--token",
    "--as",
    "--as-group",
    "-o",
    "--output",
    "-l",
    "--selector",
    "-c",
    "--container",
    "--filename",
    "--field-selector",
    "--tail",
    "--since",
    "--since-time",
    "--replicas",
    "--type",
    "--sort-by",
    "--template",
    "--timeout",
    "--grace-period",
    "--image",
    "--port",
    "--for",
];

/// Verbs where `-f` is `--filename`; elsewhere (e.g. `logs`) it is a boolean.
const FILENAME_VERBS: &[&str] = &[
    "apply", "create", "delete", "replace", "diff", "edit", "get", "describe", "label",
    "annotate", "patch", "scale", "expose", "autoscale", "set", "rollout", "wait",
];

/// Verbs whose first positional argument is a sub-command rather than a resource.
const SUBCOMMAND_VERBS: &[&str] = &["rollout", "config", "auth", "set", "certificate"];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandParseError {
    #[error("Command is empty")]
    Empty,
    #[error("Command has unbalanced quotes")]
    UnbalancedQuotes,
    #[error("Command must start with 'kubectl'")]
    NotKubectl,
    #[error("Missing kubectl verb")]
    MissingVerb,
}

/// A parsed kubectl invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    /// The command exactly as the model issued it.
    pub raw_command: String,
    /// Tokens after the leading `kubectl`.
    pub args: Vec<String>,
    pub verb: String,
    pub subcommand: Option<String>,
    pub resource: Option<String>,
    pub name: Option<String>,
    pub namespace: Option<String>,
    pub all_namespaces: bool,
    pub context: Option<String>,
}

impl CommandSpec {
    pub fn parse(raw: &str) -> Result<Self, CommandParseError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(CommandParseError::Empty);
        }

        let tokens = shlex::split(trimmed).ok_or(CommandParseError::UnbalancedQuotes)?;
        let (head, args) = tokens.split_first().ok_or(CommandParseError::Empty)?;
        if head != "kubectl" {
            return Err(CommandParseError::NotKubectl);
        }

        let mut positionals: Vec<&str> = Vec::new();
        let mut namespace = None;
        let mut context = None;
        let mut all_namespaces = false;

        let mut iter = args.iter().peekable();
        while let Some(token) = iter.next() {
            let token = token.as_str();

            // Everything after `--` is the container's argv.
            if token == "--" {
                break;
            }

            if token == "-A" || token == "--all-namespaces" {
                all_namespaces = true;
                continue;
            }

            if let Some((flag, value)) = split_inline_value(token) {
                match flag {
                    "-n" | "--namespace" => namespace = Some(value.to_string()),
                    "--context" => context = Some(value.to_string()),
                    _ => {}
                }
                continue;
            }

            if token.starts_with('-') && token != "-" {
                // `-p` takes a patch body for `patch`, but means `--previous` for `logs`.
                let patch_body = token == "-p" && positionals.first() == Some(&"patch");
                let filename = token == "-f"
                    && positionals.first().map_or(true, |verb| FILENAME_VERBS.contains(verb));
                if VALUE_FLAGS.contains(&token) || patch_body || filename {
                    let value = iter.next().map(|v| v.to_string());
                    match token {
                        "-n" | "--namespace" => namespace = value,
                        "--context" => context = value,
                        _ => {}
                    }
                }
                continue;
            }

            positionals.push(token);
        }

        let mut positionals = positionals.into_iter();
        let verb = positionals.next().ok_or(CommandParseError::MissingVerb)?.to_string();
        let subcommand = if SUBCOMMAND_VERBS.contains(&verb.as_str()) {
            positionals.next().map(str::to_string)
        } else {
            None
        };

        Ok(Self {
            raw_command: trimmed.to_string(),
            args: args.to_vec(),
            verb,
            subcommand,
            resource: positionals.next().map(str::to_string),
            name: positionals.next().map(str::to_string),
            namespace,
            all_namespaces,
            context,
        })
    }

    /// Pin the invocation to `context` unless it already names one.
    pub fn with_context(mut self, context: &str) -> Self {
        if self.context.is_none() {
            self.args.insert(0, context.to_string());
            self.args.insert(0, "--context".to_string());
            self.context = Some(context.to_string());
        }
        self
    }

    /// The invocation as it will actually run, context included. Approvals are keyed on this.
    pub fn effective_command(&self) -> String {
        let words = std::iter::once("kubectl").chain(self.args.iter().map(String::as_str));
        shlex::try_join(words).unwrap_or_else(|_| format!("kubectl {}", self.args.join(" ")))
    }

    /// Whitespace-normalized form of the command as written.
    pub fn normalized(&self) -> String {
        self.raw_command.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

/// Splits `--flag=value` and the short form `-nvalue` / `-n=value`.
fn split_inline_value(token: &str) -> Option<(&str, &str)> {
    if token.starts_with("--") {
        return token.split_once('=');
    }
    if let Some(rest) = token.strip_prefix("-n") {
        if !rest.is_empty() {
            return Some(("-n", rest.strip_prefix('=').unwrap_or(rest)));
        }
    }
    None
}
