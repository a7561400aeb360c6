//! Pipeline Configuration
//!
//! Retry bounds, schema context size, cache TTL and per-call timeouts.
//! Values come from defaults, an optional JSON file, then environment overrides.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Longest accepted cache TTL (ten years)
pub const MAX_CACHE_TTL_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Timeouts applied to each suspension point of a pipeline run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Each text-generation round trip
    pub llm_ms: u64,
    /// Schema relevance ranking
    pub ranking_ms: u64,
    /// Each query execution
    pub execution_ms: u64,
    /// Cache get / set
    pub cache_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            llm_ms: 60_000,
            ranking_ms: 30_000,
            execution_ms: 30_000,
            cache_ms: 2_000,
        }
    }
}

impl TimeoutConfig {
    pub fn llm(&self) -> Duration {
        Duration::from_millis(self.llm_ms)
    }

    pub fn ranking(&self) -> Duration {
        Duration::from_millis(self.ranking_ms)
    }

    pub fn execution(&self) -> Duration {
        Duration::from_millis(self.execution_ms)
    }

    pub fn cache(&self) -> Duration {
        Duration::from_millis(self.cache_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Corrective regenerations allowed after the first attempt
    pub max_retries: u8,
    /// Maximum number of tables exposed to the generator
    pub top_k: usize,
    pub cache_ttl_secs: u64,
    /// Rows shown to the synthesizer; the rest are summarized by count
    pub max_prompt_rows: usize,
    /// Attach the (truncated) result rows to answered responses
    pub include_rows: bool,
    pub timeouts: TimeoutConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            top_k: 3,
            cache_ttl_secs: 3600,
            max_prompt_rows: 50,
            include_rows: true,
            timeouts: TimeoutConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load from a JSON file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                serde_json::from_str(&raw).map_err(|e| {
                    PipelineError::Config(format!("Invalid config file {}: {}", path.display(), e))
                })?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `TEXT2SQL_*` overrides from the given lookup
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("TEXT2SQL_MAX_RETRIES") {
            self.max_retries = parse_env("TEXT2SQL_MAX_RETRIES", &v)?;
        }
        if let Some(v) = lookup("TEXT2SQL_TOP_K") {
            self.top_k = parse_env("TEXT2SQL_TOP_K", &v)?;
        }
        if let Some(v) = lookup("TEXT2SQL_CACHE_TTL_SECS") {
            self.cache_ttl_secs = parse_env("TEXT2SQL_CACHE_TTL_SECS", &v)?;
        }
        if let Some(v) = lookup("TEXT2SQL_MAX_PROMPT_ROWS") {
            self.max_prompt_rows = parse_env("TEXT2SQL_MAX_PROMPT_ROWS", &v)?;
        }
        if let Some(v) = lookup("TEXT2SQL_LLM_TIMEOUT_MS") {
            self.timeouts.llm_ms = parse_env("TEXT2SQL_LLM_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("TEXT2SQL_EXECUTION_TIMEOUT_MS") {
            self.timeouts.execution_ms = parse_env("TEXT2SQL_EXECUTION_TIMEOUT_MS", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.top_k == 0 {
            return Err(PipelineError::Config("top_k must be at least 1".to_string()));
        }
        if self.cache_ttl_secs > MAX_CACHE_TTL_SECS {
            return Err(PipelineError::Config(format!(
                "cache_ttl_secs must be at most {} (got {})",
                MAX_CACHE_TTL_SECS, self.cache_ttl_secs
            )));
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| PipelineError::Config(format!("{} has invalid value '{}'", key, value)))
}

/// Connection settings for an OpenAI-compatible API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub embedding_model: String,
    pub temperature: f32,
}

impl LlmConfig {
    /// Read `LLM_*` variables, falling back to the `OPENAI_*` names
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup("LLM_API_KEY")
            .or_else(|| lookup("OPENAI_API_KEY"))
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                PipelineError::Config("LLM_API_KEY (or OPENAI_API_KEY) is not set".to_string())
            })?;
        let base_url = lookup("LLM_BASE_URL")
            .or_else(|| lookup("OPENAI_BASE_URL"))
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let model = lookup("LLM_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let embedding_model =
            lookup("LLM_EMBEDDING_MODEL").unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string());

        Ok(Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            embedding_model,
            temperature: 0.0,
        })
    }
}
