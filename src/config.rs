//! TOML configuration for the `intake` binary.
//!
//! ```toml
//! [store]
//! project_id = "acme-intel"
//! credentials_path = "./service-account.json"
//!
//! [http]
//! timeout_secs = 30
//!
//! [ingest]
//! endpoint_key = "search"
//! task_type = "ANALYZE_ITEM"
//!
//! [[sources]]
//! source_id = "hackernews"
//! source_type = ["news"]
//! base_url = "https://hn.algolia.com/api/v1"
//! is_active = true
//!
//! [secrets]
//! NEWSAPI_KEY = "${NEWSAPI_KEY}"
//! ```
//!
//! Every section is optional. When `[[sources]]` is present the registry
//! reads those tables instead of the store's sources collection.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::SourceConfig;
use crate::secrets::{expand_env_vars, StaticSecrets};
use crate::store::{DEFAULT_API_BASE, DEFAULT_DATABASE_ID};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub secrets: HashMap<String, String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// Falls back to the service-account key's `project_id`.
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default = "default_database_id")]
    pub database_id: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Overrides the key file's token endpoint.
    #[serde(default)]
    pub token_uri: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub credentials_path: Option<PathBuf>,
    /// Talk to a local emulator with a static bearer token.
    #[serde(default)]
    pub emulator: bool,
    #[serde(default = "default_emulator_token")]
    pub emulator_token: String,
    #[serde(default = "default_sources_collection")]
    pub sources_collection: String,
    #[serde(default = "default_entities_collection")]
    pub entities_collection: String,
    #[serde(default = "default_tasks_collection")]
    pub tasks_collection: String,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            project_id: None,
            database_id: default_database_id(),
            api_base: default_api_base(),
            token_uri: None,
            scope: None,
            credentials_path: None,
            emulator: false,
            emulator_token: default_emulator_token(),
            sources_collection: default_sources_collection(),
            entities_collection: default_entities_collection(),
            tasks_collection: default_tasks_collection(),
            page_size: default_page_size(),
        }
    }
}

fn default_database_id() -> String {
    DEFAULT_DATABASE_ID.to_string()
}
fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}
fn default_emulator_token() -> String {
    "owner".to_string()
}
fn default_sources_collection() -> String {
    "sources".to_string()
}
fn default_entities_collection() -> String {
    "monitored_entities".to_string()
}
fn default_tasks_collection() -> String {
    "queued_tasks".to_string()
}
fn default_page_size() -> usize {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_endpoint_key")]
    pub endpoint_key: String,
    #[serde(default = "default_task_type")]
    pub task_type: String,
    /// Generic `page_size` sent to sources that map it.
    #[serde(default)]
    pub page_size: Option<usize>,
    /// Overrides every source's `default_lookback_days`.
    #[serde(default)]
    pub lookback_days: Option<u32>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            endpoint_key: default_endpoint_key(),
            task_type: default_task_type(),
            page_size: None,
            lookback_days: None,
        }
    }
}

fn default_endpoint_key() -> String {
    "search".to_string()
}
fn default_task_type() -> String {
    "ANALYZE_ITEM".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct AiConfig {
    #[serde(default = "default_completion_source_type")]
    pub completion_source_type: String,
    #[serde(default = "default_embedding_source_type")]
    pub embedding_source_type: String,
    #[serde(default)]
    pub temperature: Option<f64>,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            completion_source_type: default_completion_source_type(),
            embedding_source_type: default_embedding_source_type(),
            temperature: None,
        }
    }
}

fn default_completion_source_type() -> String {
    "llm".to_string()
}
fn default_embedding_source_type() -> String {
    "embeddings".to_string()
}

impl Config {
    /// `[secrets]` values, falling back to the process environment.
    pub fn secret_store(&self) -> StaticSecrets {
        StaticSecrets::new(self.secrets.clone()).with_env_fallback()
    }

    /// Whether source configurations come from this file.
    pub fn has_local_sources(&self) -> bool {
        !self.sources.is_empty()
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.http.timeout_secs == 0 {
        bail!("http.timeout_secs must be > 0");
    }

    if config.store.page_size == 0 {
        bail!("store.page_size must be > 0");
    }

    if config.ingest.endpoint_key.trim().is_empty() {
        bail!("ingest.endpoint_key must not be empty");
    }

    if config.ingest.page_size == Some(0) {
        bail!("ingest.page_size must be > 0 when set");
    }

    if let Some(t) = config.ai.temperature {
        if !(0.0..=2.0).contains(&t) {
            bail!("ai.temperature must be in [0.0, 2.0]");
        }
    }

    let mut seen = HashSet::new();
    for source in &config.sources {
        if source.source_id.trim().is_empty() {
            bail!("sources: source_id must not be empty");
        }
        if !seen.insert(source.source_id.as_str()) {
            bail!("sources: duplicate source_id '{}'", source.source_id);
        }
        if source.source_type.is_empty() {
            bail!("sources.{}: source_type must not be empty", source.source_id);
        }
        if !source.base_url.starts_with("http://") && !source.base_url.starts_with("https://") {
            bail!(
                "sources.{}: base_url must start with http:// or https://",
                source.source_id
            );
        }
    }

    for value in config.secrets.values_mut() {
        *value = expand_env_vars(value);
    }

    Ok(config)
}
