//! Safety Module for Agent Operations
//!
//! Classifies every proposed kubectl command and decides whether it may run,
//! must be confirmed by the operator first, or is refused outright.

use std::collections::BTreeSet;
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::kubernetes::CommandSpec;

/// What a command can do to the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandClass {
    ReadOnly,
    Mutating,
    Destructive,
}

impl CommandClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandClass::ReadOnly => "read_only",
            CommandClass::Mutating => "mutating",
            CommandClass::Destructive => "destructive",
        }
    }
}

impl fmt::Display for CommandClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SafetyDecision {
    Allow { class: CommandClass },
    ConfirmRequired { class: CommandClass, reason: String },
    Deny { reason: String },
}

/// Verb classification. Verbs not listed here are treated as destructive.
const VERB_TABLE: &[(&str, CommandClass)] = &[
    ("get", CommandClass::ReadOnly),
    ("describe", CommandClass::ReadOnly),
    ("logs", CommandClass::ReadOnly),
    ("top", CommandClass::ReadOnly),
    ("explain", CommandClass::ReadOnly),
    ("events", CommandClass::ReadOnly),
    ("api-resources", CommandClass::ReadOnly),
    ("api-versions", CommandClass::ReadOnly),
    ("cluster-info", CommandClass::ReadOnly),
    ("version", CommandClass::ReadOnly),
    ("auth", CommandClass::ReadOnly),
    ("diff", CommandClass::ReadOnly),
    ("wait", CommandClass::ReadOnly),
    ("apply", CommandClass::Mutating),
    ("patch", CommandClass::Mutating),
    ("scale", CommandClass::Mutating),
    ("edit", CommandClass::Mutating),
    ("create", CommandClass::Mutating),
    ("label", CommandClass::Mutating),
    ("annotate", CommandClass::Mutating),
    ("set", CommandClass::Mutating),
    ("autoscale", CommandClass::Mutating),
    ("expose", CommandClass::Mutating),
    ("run", CommandClass::Mutating),
    ("uncordon", CommandClass::Mutating),
    ("taint", CommandClass::Mutating),
    ("replace", CommandClass::Mutating),
    ("rollout", CommandClass::Mutating),
    ("exec", CommandClass::Mutating),
    ("cp", CommandClass::Mutating),
    ("attach", CommandClass::Mutating),
    ("port-forward", CommandClass::Mutating),
    ("proxy", CommandClass::Mutating),
    ("config", CommandClass::Mutating),
    ("delete", CommandClass::Destructive),
    ("drain", CommandClass::Destructive),
    ("cordon", CommandClass::Destructive),
];

const READ_ONLY_ROLLOUT: &[&str] = &["status", "history"];
const READ_ONLY_CONFIG: &[&str] = &[
    "view",
    "get-contexts",
    "current-context",
    "get-clusters",
    "get-users",
];
const DESTRUCTIVE_CONFIG: &[&str] = &["delete-context", "delete-cluster", "delete-user"];

/// Flags that turn an otherwise mutating command into a destructive one.
const ESCALATING_FLAGS: &[&str] = &["--force", "--grace-period=0", "--prune", "--all"];

/// Verbs that never target a namespace, so the namespace allow-list does not apply.
const CLUSTER_SCOPED_VERBS: &[&str] = &[
    "config",
    "version",
    "cluster-info",
    "api-resources",
    "api-versions",
    "explain",
    "certificate",
    "cordon",
    "uncordon",
    "drain",
    "taint",
];

/// Classify a command from its verb, sub-command and flags.
pub fn classify(spec: &CommandSpec) -> CommandClass {
    let sub = spec.subcommand.as_deref().unwrap_or_default();
    let base = match spec.verb.as_str() {
        "rollout" if READ_ONLY_ROLLOUT.contains(&sub) => CommandClass::ReadOnly,
        "config" if READ_ONLY_CONFIG.contains(&sub) => CommandClass::ReadOnly,
        "config" if DESTRUCTIVE_CONFIG.contains(&sub) => CommandClass::Destructive,
        verb => VERB_TABLE
            .iter()
            .find(|(v, _)| *v == verb)
            .map(|(_, class)| *class)
            .unwrap_or(CommandClass::Destructive),
    };

    if base == CommandClass::Mutating && escalates(spec) {
        return CommandClass::Destructive;
    }
    base
}

fn escalates(spec: &CommandSpec) -> bool {
    spec.args.iter().enumerate().any(|(i, arg)| {
        ESCALATING_FLAGS.contains(&arg.as_str())
            || (arg == "--grace-period" && spec.args.get(i + 1).map(String::as_str) == Some("0"))
    })
}

/// Safety configuration for agent operations
#[derive(Debug, Clone)]
pub struct SafetyConfig {
    /// Run destructive commands without asking
    pub auto_approve: bool,

    /// When set, commands may only target these namespaces
    pub allowed_namespaces: Option<BTreeSet<String>>,

    /// When set, commands may only target these contexts
    pub allowed_contexts: Option<BTreeSet<String>>,

    /// Regex patterns that are refused regardless of verb
    pub dangerous_patterns: Vec<Regex>,

    /// Maximum command length
    pub max_command_length: usize,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        let dangerous_patterns = [
            r"`",
            r"\$\(",
            r"rm\s+-rf",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect();

        Self {
            auto_approve: false,
            allowed_namespaces: None,
            allowed_contexts: None,
            dangerous_patterns,
            max_command_length: 1000,
        }
    }
}

/// Safety validator for agent operations
#[derive(Debug, Clone)]
pub struct SafetyValidator {
    config: SafetyConfig,
}

impl Default for SafetyValidator {
    fn default() -> Self {
        Self::new(SafetyConfig::default())
    }
}

impl SafetyValidator {
    pub fn new(config: SafetyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SafetyConfig {
        &self.config
    }

    pub fn validate(&self, spec: &CommandSpec) -> SafetyDecision {
        if let Some(reason) = self.hard_deny(spec) {
            warn!("Denied '{}': {}", spec.raw_command, reason);
            return SafetyDecision::Deny { reason };
        }

        let class = classify(spec);
        let decision = match class {
            CommandClass::ReadOnly | CommandClass::Mutating => SafetyDecision::Allow { class },
            CommandClass::Destructive if self.config.auto_approve => {
                info!("Auto-approving destructive command: {}", spec.raw_command);
                SafetyDecision::Allow { class }
            }
            CommandClass::Destructive => SafetyDecision::ConfirmRequired {
                class,
                reason: format!(
                    "'{}' is destructive and needs explicit operator confirmation",
                    spec.normalized()
                ),
            },
        };
        debug!("Safety decision for '{}': {:?}", spec.raw_command, decision);
        decision
    }

    fn hard_deny(&self, spec: &CommandSpec) -> Option<String> {
        if spec.raw_command.len() > self.config.max_command_length {
            return Some(format!(
                "Command exceeds maximum length of {} characters",
                self.config.max_command_length
            ));
        }

        // Commands never run through a shell, so these only mislead.
        if let Some(op) = unquoted_shell_operator(&spec.raw_command) {
            return Some(format!("Command contains the shell operator '{}'", op));
        }

        for pattern in &self.config.dangerous_patterns {
            if pattern.is_match(&spec.raw_command) {
                return Some(format!(
                    "Command matches dangerous pattern: {}",
                    pattern.as_str()
                ));
            }
        }

        if let Some(allowed) = &self.config.allowed_namespaces {
            if !CLUSTER_SCOPED_VERBS.contains(&spec.verb.as_str()) {
                if spec.all_namespaces {
                    return Some(
                        "--all-namespaces is not permitted while a namespace allow-list is configured"
                            .to_string(),
                    );
                }
                let namespace = spec.namespace.as_deref().unwrap_or("default");
                if !allowed.contains(namespace) {
                    return Some(format!("Namespace '{}' is not in the allow-list", namespace));
                }
            }
        }

        if let (Some(allowed), Some(context)) = (&self.config.allowed_contexts, &spec.context) {
            if !allowed.contains(context) {
                return Some(format!("Context '{}' is not in the allow-list", context));
            }
        }

        None
    }
}

/// First `|`, `;`, `&`, `<` or `>` that sits outside quotes.
fn unquoted_shell_operator(raw: &str) -> Option<char> {
    let mut quote: Option<char> = None;
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some('\''), '\'') => quote = None,
            (Some('\''), _) => {}
            (Some('"'), '"') => quote = None,
            (_, '\\') => {
                chars.next();
            }
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '|' | ';' | '&' | '<' | '>') => return Some(c),
            (None, _) => {}
        }
    }
    None
}
