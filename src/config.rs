//! Engine configuration.
//!
//! Precedence, lowest first: built-in defaults, a YAML file, `LLM_EXEC_*`
//! environment variables, then explicit [`EngineBuilder`](crate::EngineBuilder) setters.

use crate::cache::DEFAULT_FINGERPRINT_LEN;
use crate::provider::ProviderKind;
use crate::resilience::RetryConfig;
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const SECS_PER_DAY: u64 = 86_400;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 60_000,
            jitter: true,
        }
    }
}

impl RetrySettings {
    pub fn to_retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter: self.jitter,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub default_provider: ProviderKind,
    pub default_model: String,
    pub default_max_tokens: u32,
    pub cache_dir: PathBuf,
    /// Default TTL for remote-tier writes. Local entries never expire.
    pub cache_ttl_days: u64,
    pub remote_cache_url: Option<String>,
    pub retry: RetrySettings,
    /// Overrides the per-model quota table when set.
    pub max_concurrent: Option<usize>,
    pub fingerprint_len: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_provider: ProviderKind::OpenAi,
            default_model: "gpt-4o-mini".to_string(),
            default_max_tokens: 2048,
            cache_dir: PathBuf::from(".llm_cache"),
            cache_ttl_days: 365,
            remote_cache_url: None,
            retry: RetrySettings::default(),
            max_concurrent: None,
            fingerprint_len: DEFAULT_FINGERPRINT_LEN,
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            Error::configuration_with_context(
                format!("invalid value '{}' for {}", raw, name),
                ErrorContext::new().with_field_path(name),
            )
        }),
        Err(_) => Ok(None),
    }
}

impl EngineConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration_with_context(
                format!("cannot read config file: {}", e),
                ErrorContext::new().with_details(path.display().to_string()),
            )
        })?;
        Self::from_yaml_str(&text)
    }

    /// Defaults overlaid with the environment.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        cfg.apply_env()?;
        Ok(cfg)
    }

    /// Overlays `LLM_EXEC_*` variables. A malformed value is a configuration error.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Some(dir) = parse_env::<PathBuf>("LLM_EXEC_CACHE_DIR")? {
            self.cache_dir = dir;
        }
        if let Some(days) = parse_env("LLM_EXEC_CACHE_TTL_DAYS")? {
            self.cache_ttl_days = days;
        }
        if let Some(url) = parse_env::<String>("LLM_EXEC_REMOTE_CACHE_URL")? {
            self.remote_cache_url = Some(url).filter(|u| !u.trim().is_empty());
        }
        if let Some(n) = parse_env("LLM_EXEC_MAX_RETRIES")? {
            self.retry.max_retries = n;
        }
        if let Some(ms) = parse_env("LLM_EXEC_RETRY_DELAY_MS")? {
            self.retry.base_delay_ms = ms;
        }
        if let Some(ms) = parse_env("LLM_EXEC_MAX_RETRY_DELAY_MS")? {
            self.retry.max_delay_ms = ms;
        }
        if let Some(n) = parse_env("LLM_EXEC_MAX_CONCURRENT")? {
            self.max_concurrent = Some(n);
        }
        if let Some(model) = parse_env::<String>("LLM_EXEC_DEFAULT_MODEL")? {
            self.default_model = model;
        }
        if let Some(provider) = parse_env::<String>("LLM_EXEC_DEFAULT_PROVIDER")? {
            self.default_provider = provider.parse()?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent == Some(0) {
            return Err(invalid("max_concurrent", "must be at least 1"));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(invalid(
                "retry.base_delay_ms",
                "must not exceed retry.max_delay_ms",
            ));
        }
        if !(8..=64).contains(&self.fingerprint_len) {
            return Err(invalid("fingerprint_len", "must be between 8 and 64"));
        }
        if self.default_model.trim().is_empty() {
            return Err(invalid("default_model", "must not be empty"));
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_days.saturating_mul(SECS_PER_DAY))
    }
}

fn invalid(field: &str, details: &str) -> Error {
    Error::configuration_with_context(
        format!("invalid {}", field),
        ErrorContext::new()
            .with_field_path(field)
            .with_details(details)
            .with_source("engine_config"),
    )
}
