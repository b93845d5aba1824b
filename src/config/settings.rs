//! Configuration settings for querysmith.

use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure.
///
/// Built once at startup and shared behind an `Arc`; nothing mutates it
/// afterwards.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub reasoning: ReasoningConfig,
    pub search: SearchConfig,
    pub pipeline: PipelineConfig,
    pub cache: CacheConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ConfigError::ReadFile)?;
        Self::from_str(&content)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from default locations or use defaults.
    pub fn load() -> Result<Self> {
        let config_paths = [
            PathBuf::from("querysmith.toml"),
            PathBuf::from("config.toml"),
            dirs::config_dir()
                .map(|p| p.join("querysmith/config.toml"))
                .unwrap_or_default(),
            dirs::home_dir()
                .map(|p| p.join(".querysmith/config.toml"))
                .unwrap_or_default(),
        ];

        for path in &config_paths {
            if path.is_file() {
                tracing::info!("Loading config from: {}", path.display());
                return Self::from_file(path);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Config::default())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.reasoning.base_url.is_empty() {
            return Err(ConfigError::MissingField("reasoning.base_url".to_string()).into());
        }
        if self.reasoning.timeout_ms == 0 || self.reasoning.summary_timeout_ms == 0 {
            return Err(ConfigError::Invalid("reasoning timeouts must be > 0".to_string()).into());
        }

        let pipeline = &self.pipeline;
        if pipeline.allowed_indexes.is_empty() {
            return Err(
                ConfigError::MissingField("pipeline.allowed_indexes".to_string()).into(),
            );
        }
        if let Some(index) = pipeline
            .executable_indexes
            .iter()
            .find(|i| !pipeline.allowed_indexes.contains(i))
        {
            return Err(ConfigError::Invalid(format!(
                "executable index '{}' is not in allowed_indexes",
                index
            ))
            .into());
        }
        if pipeline.allowed_top_level_keys.is_empty() {
            return Err(
                ConfigError::MissingField("pipeline.allowed_top_level_keys".to_string()).into(),
            );
        }
        if pipeline.default_size > pipeline.max_size {
            return Err(
                ConfigError::Invalid("default_size must be <= max_size".to_string()).into(),
            );
        }
        for (name, value) in [
            ("default_confidence", pipeline.default_confidence),
            ("degraded_confidence", pipeline.degraded_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!("{} must be in [0, 1]", name)).into());
            }
        }

        if self.cache.enabled && self.cache.ttl_secs == 0 {
            return Err(ConfigError::Invalid("cache.ttl_secs must be > 0".to_string()).into());
        }

        Ok(())
    }
}

/// Reasoning service (OpenAI-compatible chat completions) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasoningConfig {
    /// Base URL for the chat completions API
    pub base_url: String,
    /// Model name
    pub model: String,
    /// API key (loaded from `REASONING_API_KEY` if not set)
    pub api_key: Option<String>,
    /// Hard deadline for intent extraction calls, in milliseconds
    pub timeout_ms: u64,
    /// Hard deadline for summarization calls, in milliseconds
    pub summary_timeout_ms: u64,
    /// Sampling temperature
    pub temperature: f32,
    /// Upper bound on generated tokens
    pub max_tokens: u32,
}

impl ReasoningConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn summary_timeout(&self) -> Duration {
        Duration::from_millis(self.summary_timeout_ms)
    }
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434/v1".to_string(),
            model: "mistral".to_string(),
            api_key: None,
            timeout_ms: 15_000,
            summary_timeout_ms: 10_000,
            temperature: 0.0,
            max_tokens: 1024,
        }
    }
}

/// Search backend (Elasticsearch-compatible) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Base URL of the search cluster
    pub base_url: String,
    /// Logical index key -> physical index name
    pub index_names: HashMap<String, String>,
    /// Request timeout in seconds
    pub request_timeout_secs: u64,
    /// Basic auth user
    pub username: Option<String>,
    /// Basic auth password
    pub password: Option<String>,
}

impl SearchConfig {
    /// Resolve the physical index for a logical index key.
    pub fn physical_index<'a>(&'a self, index: &'a str) -> &'a str {
        self.index_names
            .get(index)
            .map(String::as_str)
            .unwrap_or(index)
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9200".to_string(),
            index_names: HashMap::new(),
            request_timeout_secs: 30,
            username: None,
            password: None,
        }
    }
}

/// Compile pipeline configuration: allow-lists, paging defaults and
/// confidence constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Indexes a request may target
    pub allowed_indexes: Vec<String>,
    /// Indexes with a wired execution path (subset of `allowed_indexes`)
    pub executable_indexes: Vec<String>,
    /// Top-level DSL keys accepted by the security validator
    pub allowed_top_level_keys: Vec<String>,
    /// Number of prior query texts included in prompts and cache keys
    pub history_window: usize,
    /// Page size used when the intent does not specify one
    pub default_size: usize,
    /// Upper bound for any requested page size
    pub max_size: usize,
    /// Documents sampled into the summarization prompt
    pub summary_sample_size: usize,
    /// Characters kept per text field in the summarization sample
    pub summary_snippet_chars: usize,
    /// Confidence assumed when the reasoning output omits one
    pub default_confidence: f32,
    /// Confidence assigned to degraded (unparseable) intents
    pub degraded_confidence: f32,
    /// Reject DSL referencing fields missing from the schema
    pub strict_schema: bool,
}

impl PipelineConfig {
    pub fn is_allowed_index(&self, index: &str) -> bool {
        self.allowed_indexes.iter().any(|i| i == index)
    }

    pub fn is_executable_index(&self, index: &str) -> bool {
        self.executable_indexes.iter().any(|i| i == index)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            allowed_indexes: vec![
                "communications".to_string(),
                "social".to_string(),
                "surveys".to_string(),
            ],
            executable_indexes: vec!["communications".to_string()],
            allowed_top_level_keys: [
                "query",
                "aggs",
                "aggregations",
                "sort",
                "size",
                "from",
                "_source",
                "track_total_hits",
            ]
            .iter()
            .map(|k| k.to_string())
            .collect(),
            history_window: 5,
            default_size: 20,
            max_size: 100,
            summary_sample_size: 5,
            summary_snippet_chars: 240,
            default_confidence: 0.7,
            degraded_confidence: 0.3,
            strict_schema: false,
        }
    }
}

/// Intent cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable caching
    pub enabled: bool,
    /// Maximum number of cached intents
    pub max_entries: u64,
    /// TTL for cached intents in seconds
    pub ttl_secs: u64,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 10_000,
            ttl_secs: 300,
        }
    }
}
