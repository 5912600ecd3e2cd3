//! Engine configuration.
//!
//! Every tunable of the pipeline lives here with a documented default so
//! that retry budgets, timeouts and polling intervals are never buried in
//! control flow. Configuration is read from an optional YAML file and then
//! overridden from the environment.
//!
//! ```yaml
//! executor:
//!   retry_budget: 2
//!   retry_base_delay_ms: 500
//! progress:
//!   poll_interval_ms: 2000
//! llm:
//!   provider: openai
//!   model: gpt-4o-mini
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Intent Analyzer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentConfig {
    /// Prompts longer than this (in characters) are truncated.
    #[serde(default = "default_max_prompt_chars")]
    pub max_prompt_chars: usize,
    /// Upper bound applied to `estimated_task_count`.
    #[serde(default = "default_max_estimated_tasks")]
    pub max_estimated_tasks: usize,
}

fn default_max_prompt_chars() -> usize { 4000 }
fn default_max_estimated_tasks() -> usize { 12 }

impl Default for IntentConfig {
    fn default() -> Self {
        Self {
            max_prompt_chars: default_max_prompt_chars(),
            max_estimated_tasks: default_max_estimated_tasks(),
        }
    }
}

/// Tool Selector settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorConfig {
    /// Maximum number of tools handed to crew synthesis.
    #[serde(default = "default_max_tools")]
    pub max_tools: usize,
}

fn default_max_tools() -> usize { 8 }

impl Default for SelectorConfig {
    fn default() -> Self {
        Self { max_tools: default_max_tools() }
    }
}

/// Crew Generator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    #[serde(default = "default_max_agents")]
    pub max_agents: usize,
    #[serde(default = "default_max_tasks")]
    pub max_tasks: usize,
    /// Sampling temperature for the synthesis call.
    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

fn default_max_agents() -> usize { 6 }
fn default_max_tasks() -> usize { 12 }
fn default_temperature() -> f64 { 0.4 }

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            max_agents: default_max_agents(),
            max_tasks: default_max_tasks(),
            temperature: default_temperature(),
        }
    }
}

/// Crew Executor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Additional attempts after a task's first failure.
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,
    /// Base delay for exponential backoff between attempts.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Cap for the backoff delay.
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// Bound on a single tool/reasoning call.
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,
}

fn default_retry_budget() -> u32 { 2 }
fn default_retry_base_delay_ms() -> u64 { 500 }
fn default_retry_max_delay_ms() -> u64 { 8000 }
fn default_task_timeout_secs() -> u64 { 120 }

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            retry_budget: default_retry_budget(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            task_timeout_secs: default_task_timeout_secs(),
        }
    }
}

impl ExecutorConfig {
    /// Backoff before retry number `retries_used + 1`: `base * 2^n`, capped.
    pub fn retry_backoff(&self, retries_used: u32) -> Duration {
        if self.retry_base_delay_ms == 0 {
            return Duration::ZERO;
        }
        let max_ms = self.retry_max_delay_ms.max(self.retry_base_delay_ms);
        let multiplier = 1u64 << retries_used.min(20);
        Duration::from_millis(self.retry_base_delay_ms.saturating_mul(multiplier).min(max_ms))
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }
}

/// Progress Stream settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Capacity of the in-process change notification channel.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_poll_interval_ms() -> u64 { 2000 }
fn default_heartbeat_interval_ms() -> u64 { 15_000 }
fn default_channel_capacity() -> usize { 1024 }

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl ProgressConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(1))
    }
}

/// Which reasoning backend to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProviderKind {
    /// OpenAI-compatible chat completions endpoint.
    Openai,
    /// Offline provider that returns canned responses.
    Scripted,
}

/// Reasoning backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: LlmProviderKind,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_llm_max_retries")]
    pub max_retries: u32,
}

fn default_provider() -> LlmProviderKind { LlmProviderKind::Openai }
fn default_model() -> String { "gpt-4o-mini".to_string() }
fn default_api_key_env() -> String { "OPENAI_API_KEY".to_string() }
fn default_llm_timeout_secs() -> u64 { 120 }
fn default_llm_max_retries() -> u32 { 2 }

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            api_key_env: default_api_key_env(),
            timeout_secs: default_llm_timeout_secs(),
            max_retries: default_llm_max_retries(),
        }
    }
}

/// Which Execution Store backend the server uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Memory,
    Sqlite,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_store")]
    pub store: StoreKind,
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,
}

fn default_port() -> u16 { 8080 }
fn default_store() -> StoreKind { StoreKind::Memory }
fn default_sqlite_path() -> String { "crewforge.db".to_string() }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            store: default_store(),
            sqlite_path: default_sqlite_path(),
        }
    }
}

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub intent: IntentConfig,
    #[serde(default)]
    pub selector: SelectorConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub progress: ProgressConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl EngineConfig {
    /// Parse a YAML document. Missing sections take their defaults.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Load from an optional YAML file, then apply environment overrides.
    ///
    /// A path that does not exist yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) if p.exists() => {
                let content = std::fs::read_to_string(p).map_err(|source| ConfigError::Io {
                    path: p.display().to_string(),
                    source,
                })?;
                Self::from_yaml(&content)?
            }
            Some(p) => {
                log::warn!("Config file {} not found, using defaults", p.display());
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply overrides from an environment lookup function.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PORT") {
            self.server.port = parse_env("PORT", &port)?;
        }
        if let Some(store) = lookup("CREWFORGE_STORE") {
            self.server.store = match store.to_lowercase().as_str() {
                "memory" => StoreKind::Memory,
                "sqlite" => StoreKind::Sqlite,
                _ => {
                    return Err(ConfigError::InvalidEnv {
                        key: "CREWFORGE_STORE".into(),
                        value: store,
                    })
                }
            };
        }
        if let Some(path) = lookup("CREWFORGE_SQLITE_PATH") {
            self.server.sqlite_path = path;
        }
        if let Some(provider) = lookup("CREWFORGE_LLM_PROVIDER") {
            self.llm.provider = match provider.to_lowercase().as_str() {
                "openai" => LlmProviderKind::Openai,
                "scripted" => LlmProviderKind::Scripted,
                _ => {
                    return Err(ConfigError::InvalidEnv {
                        key: "CREWFORGE_LLM_PROVIDER".into(),
                        value: provider,
                    })
                }
            };
        }
        if let Some(model) = lookup("CREWFORGE_LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(url) = lookup("CREWFORGE_LLM_BASE_URL") {
            self.llm.base_url = Some(url);
        }
        if let Some(budget) = lookup("CREWFORGE_RETRY_BUDGET") {
            self.executor.retry_budget = parse_env("CREWFORGE_RETRY_BUDGET", &budget)?;
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        key: key.to_string(),
        value: value.to_string(),
    })
}
