use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StrataConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub ingest: IngestConfig,
    pub retrieval: RetrievalConfig,
    pub infection: InfectionConfig,
    pub reasoning: ReasoningConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IngestConfig {
    /// Maximum Hamming distance at which two fingerprints count as the same atom.
    pub dedup_distance: u32,
    pub max_write_retries: u32,
    pub retry_backoff_ms: u64,
    pub default_provenance: String,
    pub default_buckets: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Total context budget, in characters of atom content.
    pub context_budget: usize,
    /// Share of the budget reserved for lexical anchors; the rest goes to the walk.
    pub anchor_ratio: f64,
    pub sovereign_weight: f64,
    pub external_weight: f64,
    pub candidate_limit: usize,
    pub fallback_scan_limit: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct InfectionConfig {
    pub sample_size: usize,
    pub batch_size: usize,
    pub max_write_retries: u32,
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ReasoningConfig {
    /// `"none"` disables discovery; `"http"` talks to an OpenAI-compatible endpoint.
    pub provider: String,
    pub endpoint: String,
    pub model: String,
    /// Name of the environment variable holding a bearer token, if any.
    pub api_key_env: Option<String>,
    pub timeout_secs: u64,
    pub max_sample_chars: usize,
}

impl Default for StrataConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            ingest: IngestConfig::default(),
            retrieval: RetrievalConfig::default(),
            infection: InfectionConfig::default(),
            reasoning: ReasoningConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_strata_dir()
            .join("strata.db")
            .to_string_lossy()
            .into_owned();
        Self { db_path }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            dedup_distance: 3,
            max_write_retries: 3,
            retry_backoff_ms: 50,
            default_provenance: "sovereign".into(),
            default_buckets: Vec::new(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            context_budget: 8000,
            anchor_ratio: 0.7,
            sovereign_weight: 3.0,
            external_weight: 1.0,
            candidate_limit: 200,
            fallback_scan_limit: 5000,
        }
    }
}

impl Default for InfectionConfig {
    fn default() -> Self {
        Self {
            sample_size: 50,
            batch_size: 100,
            max_write_retries: 3,
            retry_backoff_ms: 50,
        }
    }
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            provider: "none".into(),
            endpoint: "http://127.0.0.1:8080/v1/chat/completions".into(),
            model: "local".into(),
            api_key_env: None,
            timeout_secs: 120,
            max_sample_chars: 24_000,
        }
    }
}

/// Returns `~/.strata/`
pub fn default_strata_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".strata")
}

/// Returns the default config file path: `~/.strata/config.toml`
pub fn default_config_path() -> PathBuf {
    default_strata_dir().join("config.toml")
}

impl StrataConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            StrataConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides (STRATA_DB, STRATA_LOG_LEVEL, STRATA_REASONING_ENDPOINT).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("STRATA_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("STRATA_LOG_LEVEL") {
            self.server.log_level = val;
        }
        if let Ok(val) = std::env::var("STRATA_REASONING_ENDPOINT") {
            self.reasoning.endpoint = val;
            if self.reasoning.provider == "none" {
                self.reasoning.provider = "http".into();
            }
        }
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
