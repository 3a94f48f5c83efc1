use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent::provider::{anthropic, bedrock, LLMConfig};
use crate::agent::safety::SafetyConfig;
use crate::agent::session::SessionLimits;

const PROVIDERS: &[&str] = &["bedrock", "anthropic", "mock"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub llm: LLMConfig,
    pub session: SessionConfig,
    pub safety: SafetySettings,
    pub kubectl: KubectlConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub max_rounds: u32,
    pub command_timeout_secs: u64,
    pub context_timeout_secs: u64,
    pub inference_timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SafetySettings {
    pub auto_approve: bool,
    pub allowed_namespaces: Option<Vec<String>>,
    pub allowed_contexts: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KubectlConfig {
    pub binary: String,
    pub skip_preflight: bool,
}

/// Values given on the command line; they win over the environment.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub provider: Option<String>,
    pub region: Option<String>,
    /// Model for whichever provider ends up selected.
    pub model_id: Option<String>,
}

impl CliOverrides {
    fn get(&self, key: &str) -> Option<String> {
        match key {
            "KUBECTL_AGENT_PROVIDER" => self.provider.clone(),
            "BEDROCK_MODEL_REGION" => self.region.clone(),
            "BEDROCK_MODEL_ID" | "ANTHROPIC_MODEL" => self.model_id.clone(),
            _ => None,
        }
    }
}

impl Config {
    pub fn load() -> crate::Result<Self> {
        Self::load_with(&CliOverrides::default())
    }

    pub fn load_with(overrides: &CliOverrides) -> crate::Result<Self> {
        // Load environment variables from .env file if it exists
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| overrides.get(key).or_else(|| std::env::var(key).ok()))
    }

    /// Build from any key lookup; `load` uses the process environment.
    pub fn from_lookup<F>(lookup: F) -> crate::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let provider = var("KUBECTL_AGENT_PROVIDER")
            .unwrap_or_else(|| "bedrock".to_string())
            .to_lowercase();

        let (model, endpoint, api_key) = match provider.as_str() {
            "anthropic" => (
                var("ANTHROPIC_MODEL").unwrap_or_else(|| anthropic::DEFAULT_MODEL.to_string()),
                Some(var("ANTHROPIC_BASE_URL").unwrap_or_else(|| anthropic::DEFAULT_ENDPOINT.to_string())),
                var("ANTHROPIC_API_KEY"),
            ),
            _ => (
                var("BEDROCK_MODEL_ID").unwrap_or_else(|| bedrock::DEFAULT_MODEL_ID.to_string()),
                None,
                None,
            ),
        };

        let config = Config {
            llm: LLMConfig {
                provider,
                model,
                region: Some(var("BEDROCK_MODEL_REGION").unwrap_or_else(|| bedrock::DEFAULT_REGION.to_string())),
                endpoint,
                api_key,
                temperature: parse_opt(&var, "KUBECTL_AGENT_TEMPERATURE")?,
                max_tokens: parse_or(&var, "KUBECTL_AGENT_MAX_TOKENS", 4096)?,
            },
            session: SessionConfig {
                max_rounds: parse_or(&var, "KUBECTL_AGENT_MAX_ROUNDS", 10)?,
                command_timeout_secs: parse_or(&var, "KUBECTL_AGENT_COMMAND_TIMEOUT_SECS", 30)?,
                context_timeout_secs: parse_or(&var, "KUBECTL_AGENT_CONTEXT_TIMEOUT_SECS", 10)?,
                inference_timeout_secs: parse_or(&var, "KUBECTL_AGENT_INFERENCE_TIMEOUT_SECS", 120)?,
            },
            safety: SafetySettings {
                auto_approve: parse_or(&var, "KUBECTL_AGENT_AUTO_APPROVE", false)?,
                allowed_namespaces: var("KUBECTL_AGENT_ALLOWED_NAMESPACES").map(|v| split_list(&v)),
                allowed_contexts: var("KUBECTL_AGENT_ALLOWED_CONTEXTS").map(|v| split_list(&v)),
            },
            kubectl: KubectlConfig {
                binary: var("KUBECTL_BINARY").unwrap_or_else(|| "kubectl".to_string()),
                skip_preflight: parse_or(&var, "KUBECTL_AGENT_SKIP_PREFLIGHT", false)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if !PROVIDERS.contains(&self.llm.provider.as_str()) {
            return Err(crate::Error::Config(format!(
                "KUBECTL_AGENT_PROVIDER must be one of {}, got '{}'",
                PROVIDERS.join(", "),
                self.llm.provider
            )));
        }
        if self.session.max_rounds == 0 {
            return Err(crate::Error::Config(
                "KUBECTL_AGENT_MAX_ROUNDS must be at least 1".to_string(),
            ));
        }
        for (name, value) in [
            ("KUBECTL_AGENT_COMMAND_TIMEOUT_SECS", self.session.command_timeout_secs),
            ("KUBECTL_AGENT_CONTEXT_TIMEOUT_SECS", self.session.context_timeout_secs),
            ("KUBECTL_AGENT_INFERENCE_TIMEOUT_SECS", self.session.inference_timeout_secs),
        ] {
            if value == 0 {
                return Err(crate::Error::Config(format!("{} must be at least 1", name)));
            }
        }
        if let Some(t) = self.llm.temperature {
            if !(0.0..=1.0).contains(&t) {
                return Err(crate::Error::Config(format!(
                    "KUBECTL_AGENT_TEMPERATURE must be between 0 and 1, got {}",
                    t
                )));
            }
        }
        if self.llm.max_tokens == 0 {
            return Err(crate::Error::Config(
                "KUBECTL_AGENT_MAX_TOKENS must be at least 1".to_string(),
            ));
        }
        if self.llm.provider == "anthropic" && self.llm.api_key.is_none() {
            tracing::warn!("ANTHROPIC_API_KEY is not set. The anthropic provider will refuse to start.");
        }
        Ok(())
    }

    pub fn session_limits(&self) -> SessionLimits {
        SessionLimits {
            max_rounds: self.session.max_rounds,
            max_command_timeout: Duration::from_secs(self.session.command_timeout_secs),
        }
    }

    pub fn context_timeout(&self) -> Duration {
        Duration::from_secs(self.session.context_timeout_secs)
    }

    pub fn inference_timeout(&self) -> Duration {
        Duration::from_secs(self.session.inference_timeout_secs)
    }

    pub fn safety_config(&self) -> SafetyConfig {
        let to_set = |list: &Option<Vec<String>>| {
            list.as_ref()
                .map(|items| items.iter().cloned().collect::<BTreeSet<_>>())
        };
        SafetyConfig {
            auto_approve: self.safety.auto_approve,
            allowed_namespaces: to_set(&self.safety.allowed_namespaces),
            allowed_contexts: to_set(&self.safety.allowed_contexts),
            ..Default::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm: LLMConfig::default(),
            session: SessionConfig {
                max_rounds: 10,
                command_timeout_secs: 30,
                context_timeout_secs: 10,
                inference_timeout_secs: 120,
            },
            safety: SafetySettings::default(),
            kubectl: KubectlConfig {
                binary: "kubectl".to_string(),
                skip_preflight: false,
            },
        }
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_or<T, F>(var: &F, key: &str, default: T) -> crate::Result<T>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    Ok(parse_opt(var, key)?.unwrap_or(default))
}

fn parse_opt<T, F>(var: &F, key: &str) -> crate::Result<Option<T>>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        None => Ok(None),
        Some(raw) => {
            let normalized = match raw.to_lowercase().as_str() {
                "yes" | "on" | "1" if key.ends_with("APPROVE") || key.ends_with("PREFLIGHT") => "true".to_string(),
                "no" | "off" | "0" if key.ends_with("APPROVE") || key.ends_with("PREFLIGHT") => "false".to_string(),
                _ => raw.to_lowercase(),
            };
            normalized
                .parse::<T>()
                .map(Some)
                .map_err(|_| crate::Error::Config(format!("{} has an invalid value '{}'", key, raw)))
        }
    }
}
