//! Pipeline configuration loaded from TOML.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::defaults;
use crate::types::Stage;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "CONSENT_PIPELINE_CONFIG";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "pipeline.toml";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration.
///
/// Load with `PipelineConfig::load()` which searches:
/// 1. `$CONSENT_PIPELINE_CONFIG`
/// 2. `./pipeline.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    /// Poll and backoff timing per stage
    #[serde(default)]
    pub workers: WorkerConfig,

    /// Insight change detector and LLM settings
    #[serde(default)]
    pub insight: InsightConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

impl PipelineConfig {
    /// Load configuration using the standard search order:
    /// 1. `$CONSENT_PIPELINE_CONFIG` environment variable
    /// 2. `./pipeline.toml` in the current working directory
    /// 3. Built-in defaults
    pub fn load() -> Self {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded pipeline config from {}", CONFIG_ENV);
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from {}, falling back", CONFIG_ENV);
                    }
                }
            } else {
                warn!(path = %path, "{} points to non-existent file, falling back", CONFIG_ENV);
            }
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("Loaded pipeline config from ./{}", LOCAL_CONFIG_FILE);
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{}, using defaults", LOCAL_CONFIG_FILE);
                }
            }
        }

        info!("No {} found, using built-in defaults", LOCAL_CONFIG_FILE);
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Reject settings that would stall or spin the workers.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();
        let w = &self.workers;

        for (name, value) in [
            ("workers.validator_poll_secs", w.validator_poll_secs),
            ("workers.redactor_poll_secs", w.redactor_poll_secs),
            ("workers.insight_poll_secs", w.insight_poll_secs),
            ("workers.validator_backoff_secs", w.validator_backoff_secs),
            ("workers.redactor_backoff_secs", w.redactor_backoff_secs),
            ("workers.insight_backoff_secs", w.insight_backoff_secs),
            ("insight.event_delta_threshold", self.insight.event_delta_threshold),
            ("insight.llm_timeout_secs", self.insight.llm_timeout_secs),
            ("storage.flush_every_ms", self.storage.flush_every_ms),
        ] {
            if value == 0 {
                errors.push(format!("{name}: must be > 0"));
            }
        }

        let t = self.insight.temperature;
        if !t.is_finite() || !(0.0..=2.0).contains(&t) {
            errors.push(format!("insight.temperature: must be within 0.0..=2.0 (got {t})"));
        }
        if self.insight.max_tokens == 0 || self.insight.answer_max_tokens == 0 {
            errors.push("insight.max_tokens / answer_max_tokens: must be > 0".to_string());
        }
        if self.server.addr.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!("server.addr: not a socket address ({})", self.server.addr));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {}: {1}", .0.display())]
    Io(PathBuf, #[source] std::io::Error),
    #[error("invalid TOML in {}: {1}", .0.display())]
    Parse(PathBuf, #[source] toml::de::Error),
    #[error("cannot serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid config: {}", .0.join("; "))]
    Validation(Vec<String>),
}

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// sled database directory. Overridden by `--db`.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    /// sled background flush interval (milliseconds)
    #[serde(default = "default_flush_every_ms")]
    pub flush_every_ms: u64,
}

fn default_db_path() -> PathBuf {
    PathBuf::from(defaults::DEFAULT_DB_PATH)
}

fn default_flush_every_ms() -> u64 {
    defaults::DB_FLUSH_EVERY_MS
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            flush_every_ms: default_flush_every_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_validator_poll")]
    pub validator_poll_secs: u64,
    #[serde(default = "default_redactor_poll")]
    pub redactor_poll_secs: u64,
    #[serde(default = "default_insight_poll")]
    pub insight_poll_secs: u64,
    #[serde(default = "default_validator_backoff")]
    pub validator_backoff_secs: u64,
    #[serde(default = "default_redactor_backoff")]
    pub redactor_backoff_secs: u64,
    #[serde(default = "default_insight_backoff")]
    pub insight_backoff_secs: u64,
}

fn default_validator_poll() -> u64 { defaults::VALIDATOR_POLL_SECS }
fn default_redactor_poll() -> u64 { defaults::REDACTOR_POLL_SECS }
fn default_insight_poll() -> u64 { defaults::INSIGHT_POLL_SECS }
fn default_validator_backoff() -> u64 { defaults::VALIDATOR_BACKOFF_SECS }
fn default_redactor_backoff() -> u64 { defaults::REDACTOR_BACKOFF_SECS }
fn default_insight_backoff() -> u64 { defaults::INSIGHT_BACKOFF_SECS }

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            validator_poll_secs: default_validator_poll(),
            redactor_poll_secs: default_redactor_poll(),
            insight_poll_secs: default_insight_poll(),
            validator_backoff_secs: default_validator_backoff(),
            redactor_backoff_secs: default_redactor_backoff(),
            insight_backoff_secs: default_insight_backoff(),
        }
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self, stage: Stage) -> Duration {
        Duration::from_secs(match stage {
            Stage::Validator => self.validator_poll_secs,
            Stage::Redactor => self.redactor_poll_secs,
            Stage::Insight => self.insight_poll_secs,
        })
    }

    pub fn backoff(&self, stage: Stage) -> Duration {
        Duration::from_secs(match stage {
            Stage::Validator => self.validator_backoff_secs,
            Stage::Redactor => self.redactor_backoff_secs,
            Stage::Insight => self.insight_backoff_secs,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsightConfig {
    /// Growth in `total_events` since the last insight that fires a new one
    #[serde(default = "default_event_delta")]
    pub event_delta_threshold: u64,

    #[serde(default = "default_llm_timeout")]
    pub llm_timeout_secs: u64,

    #[serde(default = "default_model")]
    pub model: String,

    /// Base URL of an OpenAI-compatible chat completions API
    #[serde(default = "default_api_base")]
    pub api_base: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_answer_max_tokens")]
    pub answer_max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_event_delta() -> u64 { defaults::INSIGHT_EVENT_DELTA }
fn default_llm_timeout() -> u64 { defaults::LLM_TIMEOUT_SECS }
fn default_model() -> String { defaults::LLM_MODEL.to_string() }
fn default_api_base() -> String { defaults::LLM_API_BASE.to_string() }
fn default_max_tokens() -> u32 { defaults::LLM_INSIGHT_MAX_TOKENS }
fn default_answer_max_tokens() -> u32 { defaults::LLM_ANSWER_MAX_TOKENS }
fn default_temperature() -> f32 { defaults::LLM_TEMPERATURE }

impl Default for InsightConfig {
    fn default() -> Self {
        Self {
            event_delta_threshold: default_event_delta(),
            llm_timeout_secs: default_llm_timeout(),
            model: default_model(),
            api_base: default_api_base(),
            max_tokens: default_max_tokens(),
            answer_max_tokens: default_answer_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

impl InsightConfig {
    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server bind address.
    ///
    /// Can be overridden by `CONSENT_PIPELINE_ADDR` env var or `--addr` CLI flag.
    #[serde(default = "default_server_addr")]
    pub addr: String,
}

fn default_server_addr() -> String {
    defaults::DEFAULT_SERVER_ADDR.to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_server_addr(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
