use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::carrier::DEFAULT_CONTEXT_EXCHANGES;
use crate::catalog::ProviderKind;
use crate::dispatcher::RetryPolicy;
use crate::error::ConfigError;
use crate::planner::DEFAULT_SCENE_FILL_RATIO;
use crate::prompt::NarrativeStyle;

/// Upper bound on carried exchanges; more than this crowds out the chunk.
pub const MAX_CONTEXT_EXCHANGES: usize = 16;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub processing: ProcessingConfig,
    pub openai: Option<EndpointConfig>,
    pub anthropic: Option<EndpointConfig>,
    pub gemini: Option<EndpointConfig>,
    pub novelai: Option<EndpointConfig>,
    /// Per-model price overrides keyed by catalog model name.
    pub pricing: HashMap<String, PriceOverride>,
    pub caching: CachingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Inferred from the model when absent.
    pub provider: Option<String>,
    pub model_version: String,
    pub temperature: f32,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: None,
            model_version: "gpt-4o".into(),
            temperature: 0.7,
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    pub split_on_scene_changes: bool,
    pub context_exchanges: usize,
    pub style: NarrativeStyle,
    /// Derived from the model's context window when absent.
    pub max_chunk_tokens: Option<usize>,
    pub scene_fill_ratio: f64,
    /// 0 disables the forced scene break.
    pub max_exchanges_per_scene: usize,
    pub concurrency: usize,
    pub prompt_template: Option<PathBuf>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            split_on_scene_changes: true,
            context_exchanges: DEFAULT_CONTEXT_EXCHANGES,
            style: NarrativeStyle::default(),
            max_chunk_tokens: None,
            scene_fill_ratio: DEFAULT_SCENE_FILL_RATIO,
            max_exchanges_per_scene: 0,
            concurrency: 1,
            prompt_template: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EndpointConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    /// API version header, Anthropic only.
    pub version: Option<String>,
}

impl EndpointConfig {
    /// The configured key, or `env` when the key is absent or blank.
    pub fn effective_api_key(&self, env: &str) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var(env).ok().filter(|k| !k.trim().is_empty()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceOverride {
    pub input_usd_per_1m: f64,
    pub output_usd_per_1m: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CachingConfig {
    pub enabled: Option<bool>,
}

impl CachingConfig {
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }
}

impl Config {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(p) = path {
            let text = fs::read_to_string(p).with_context(|| format!("reading config at {}", p.display()))?;
            return parse(p, &text).with_context(|| format!("parsing config at {}", p.display()));
        }
        let default = Self::default_path()?;
        if default.exists() {
            let text = fs::read_to_string(&default)
                .with_context(|| format!("reading config at {}", default.display()))?;
            parse(&default, &text).with_context(|| "parsing config")
        } else {
            tracing::debug!(path = %default.display(), "no config file, using defaults");
            Ok(Self::default())
        }
    }

    pub fn default_path() -> Result<PathBuf> {
        let base = dirs::config_dir().ok_or_else(|| anyhow!("cannot resolve config dir"))?;
        Ok(base.join("rusty-narrative").join("config.toml"))
    }

    pub fn endpoint(&self, kind: ProviderKind) -> Option<&EndpointConfig> {
        match kind {
            ProviderKind::OpenAi => self.openai.as_ref(),
            ProviderKind::Anthropic => self.anthropic.as_ref(),
            ProviderKind::Gemini => self.gemini.as_ref(),
            ProviderKind::NovelAi => self.novelai.as_ref(),
        }
    }

    /// Range checks that need no catalog. Model and provider names are
    /// checked when the catalog resolves them.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let llm = &self.llm;
        let p = &self.processing;
        if !(0.0..=2.0).contains(&llm.temperature) {
            return Err(ConfigError::Invalid(format!(
                "temperature {} is outside 0.0..=2.0",
                llm.temperature
            )));
        }
        if llm.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be at least 1".into()));
        }
        if llm.timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeout_secs must be at least 1".into()));
        }
        if p.context_exchanges > MAX_CONTEXT_EXCHANGES {
            return Err(ConfigError::Invalid(format!(
                "context_exchanges {} exceeds the maximum of {MAX_CONTEXT_EXCHANGES}",
                p.context_exchanges
            )));
        }
        if p.concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be at least 1".into()));
        }
        if p.max_chunk_tokens == Some(0) {
            return Err(ConfigError::Invalid("max_chunk_tokens must be greater than zero".into()));
        }
        if !(p.scene_fill_ratio > 0.0 && p.scene_fill_ratio <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "scene_fill_ratio {} is outside (0.0, 1.0]",
                p.scene_fill_ratio
            )));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.llm.max_attempts,
            initial_delay: Duration::from_millis(self.llm.initial_backoff_ms),
            max_delay: Duration::from_millis(self.llm.max_backoff_ms),
        }
    }

    pub fn write_example_if_absent() -> Result<PathBuf> {
        let path = Self::default_path()?;
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            fs::write(&path, EXAMPLE)?;
        }
        Ok(path)
    }
}

const EXAMPLE: &str = r#"# rusty-narrative config (TOML)

[llm]
# provider is inferred from model_version when omitted
# provider = "openai"
model_version = "gpt-4o"
temperature = 0.7
max_attempts = 3
initial_backoff_ms = 500
max_backoff_ms = 8000
timeout_secs = 120

[processing]
split_on_scene_changes = true
context_exchanges = 2
style = "first-person"  # first-person | second-person | third-person
# max_chunk_tokens = 12000
scene_fill_ratio = 0.7
max_exchanges_per_scene = 0
concurrency = 1
# prompt_template = "/path/to/narrative.tmpl"

[openai]
# api_key can be omitted to use env var OPENAI_API_KEY
api_key = ""
base_url = "https://api.openai.com/v1"

[anthropic]
# api_key can be omitted to use env var ANTHROPIC_API_KEY
api_key = ""
base_url = "https://api.anthropic.com"
version = "2023-06-01"

[gemini]
# api_key can be omitted to use env var GEMINI_API_KEY
api_key = ""
base_url = "https://generativelanguage.googleapis.com"

[novelai]
# api_key can be omitted to use env var NOVELAI_API_KEY
api_key = ""
base_url = "https://text.novelai.net"

# Override built-in prices (USD per 1M tokens)
# [pricing.gpt-4o]
# input_usd_per_1m = 2.5
# output_usd_per_1m = 10.0

[caching]
enabled = true
"#;

fn parse(path: &Path, text: &str) -> Result<Config> {
    match path.extension().and_then(|s| s.to_str()) {
        Some("json") => serde_json::from_str(text).map_err(|e| anyhow!(e)),
        _ => toml::from_str(text).map_err(|e| anyhow!(e)),
    }
}
