//! Configuration loading for search-reindex.
//!
//! Layered config: defaults -> user config file -> ./config -> ./config.{APP_ENV}
//! -> CLI-specified file -> env vars (`REINDEX__*`) -> CLI flags.

use std::path::PathBuf;
use std::time::Duration;

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::ReindexError;

/// Rulesets that have a high-score table to index.
pub const VALID_MODES: &[&str] = &["osu", "taiko", "fruits", "mania"];

/// Elasticsearch connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElasticsearchSettings {
    /// Base URL of the cluster
    #[serde(default = "default_es_host")]
    pub host: String,

    /// Prefix prepended to aliases and the `index_meta` index
    #[serde(default)]
    pub prefix: String,

    /// Basic auth user
    #[serde(default)]
    pub username: Option<String>,

    /// Basic auth password (prefer REINDEX__ELASTICSEARCH__PASSWORD over the file)
    #[serde(default)]
    pub password: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_es_timeout")]
    pub timeout_secs: u64,
}

fn default_es_host() -> String {
    "http://localhost:9200".to_string()
}

fn default_es_timeout() -> u64 {
    60
}

impl Default for ElasticsearchSettings {
    fn default() -> Self {
        Self {
            host: default_es_host(),
            prefix: String::new(),
            username: None,
            password: None,
            timeout_secs: default_es_timeout(),
        }
    }
}

/// Where checkpoints are persisted
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointBackend {
    /// `index_meta` documents in the same cluster as the sink (default)
    #[default]
    Elasticsearch,
    /// Local RocksDB directory
    Rocksdb,
}

/// Checkpoint store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointSettings {
    #[serde(default)]
    pub backend: CheckpointBackend,

    /// Directory for the RocksDB backend
    #[serde(default = "default_checkpoint_path")]
    pub path: String,
}

fn default_checkpoint_path() -> String {
    ProjectDirs::from("", "", "search-reindex")
        .map(|p| p.data_local_dir().join("checkpoints"))
        .unwrap_or_else(|| PathBuf::from("./checkpoints"))
        .to_string_lossy()
        .to_string()
}

impl Default for CheckpointSettings {
    fn default() -> Self {
        Self {
            backend: CheckpointBackend::default(),
            path: default_checkpoint_path(),
        }
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// MySQL connection string for the source database
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Rows per source query and per bulk request
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Capacity of the work queue between reader and writer
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,

    /// Maximum bulk requests outstanding at once
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Sleep per unit of adaptive delay, in milliseconds
    #[serde(default = "default_delay_step_ms")]
    pub delay_step_ms: u64,

    /// Explicit cursor to resume from; overrides the stored checkpoint once
    #[serde(default)]
    pub resume_from: Option<i64>,

    /// Keep re-running after completion
    #[serde(default)]
    pub watch: bool,

    /// Pause between watch cycles, in milliseconds
    #[serde(default = "default_polling_interval_ms")]
    pub polling_interval_ms: u64,

    /// Rulesets to index
    #[serde(default = "default_modes")]
    pub modes: Vec<String>,

    /// Override for the index schema JSON file
    #[serde(default)]
    pub schema_path: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub elasticsearch: ElasticsearchSettings,

    #[serde(default)]
    pub checkpoint: CheckpointSettings,
}

fn default_database_url() -> String {
    "mysql://localhost/osu".to_string()
}

fn default_chunk_size() -> usize {
    10_000
}

fn default_queue_size() -> usize {
    5
}

fn default_max_in_flight() -> usize {
    4
}

fn default_delay_step_ms() -> u64 {
    100
}

fn default_polling_interval_ms() -> u64 {
    10_000
}

fn default_modes() -> Vec<String> {
    vec!["osu".to_string()]
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            chunk_size: default_chunk_size(),
            queue_size: default_queue_size(),
            max_in_flight: default_max_in_flight(),
            delay_step_ms: default_delay_step_ms(),
            resume_from: None,
            watch: false,
            polling_interval_ms: default_polling_interval_ms(),
            modes: default_modes(),
            schema_path: None,
            log_level: default_log_level(),
            elasticsearch: ElasticsearchSettings::default(),
            checkpoint: CheckpointSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. User config file (~/.config/search-reindex/config.*)
    /// 3. `config.*` and `config.{APP_ENV}.*` in the working directory
    /// 4. CLI-specified config file (optional)
    /// 5. Environment variables (REINDEX__CHUNK_SIZE, REINDEX__ELASTICSEARCH__HOST, ...)
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, ReindexError> {
        let config_dir = ProjectDirs::from("", "", "search-reindex")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        let user_config_path = config_dir.join("config");
        let app_env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let mut builder = Config::builder()
            .set_default("chunk_size", default_chunk_size() as i64)
            .map_err(|e| ReindexError::Config(e.to_string()))?
            .set_default("queue_size", default_queue_size() as i64)
            .map_err(|e| ReindexError::Config(e.to_string()))?
            .set_default("polling_interval_ms", default_polling_interval_ms() as i64)
            .map_err(|e| ReindexError::Config(e.to_string()))?
            .set_default("log_level", default_log_level())
            .map_err(|e| ReindexError::Config(e.to_string()))?
            .add_source(File::with_name(&user_config_path.to_string_lossy()).required(false))
            .add_source(File::with_name("config").required(false))
            .add_source(File::with_name(&format!("config.{}", app_env)).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("REINDEX")
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("modes")
                .try_parsing(true),
        );

        let settings: Settings = builder
            .build()
            .map_err(|e| ReindexError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| ReindexError::Config(e.to_string()))?;

        settings.validate()?;
        Ok(settings)
    }

    /// Reject values the pipeline can't run with.
    pub fn validate(&self) -> Result<(), ReindexError> {
        if self.chunk_size == 0 {
            return Err(ReindexError::Config("chunk_size must be > 0".to_string()));
        }
        if self.queue_size == 0 {
            return Err(ReindexError::Config("queue_size must be > 0".to_string()));
        }
        if self.max_in_flight == 0 {
            return Err(ReindexError::Config("max_in_flight must be > 0".to_string()));
        }
        if let Some(mode) = self.modes.iter().find(|m| !VALID_MODES.contains(&m.as_str())) {
            return Err(ReindexError::Config(format!(
                "unknown mode '{}' (expected one of {})",
                mode,
                VALID_MODES.join(", ")
            )));
        }
        Ok(())
    }

    /// Alias for a ruleset's high-score index, e.g. `{prefix}high_scores_osu`.
    pub fn alias_for_mode(&self, mode: &str) -> String {
        format!("{}high_scores_{}", self.elasticsearch.prefix, mode)
    }

    /// Name of the index holding checkpoint documents.
    pub fn index_meta_name(&self) -> String {
        format!("{}index_meta", self.elasticsearch.prefix)
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }

    pub fn delay_step(&self) -> Duration {
        Duration::from_millis(self.delay_step_ms)
    }
}
