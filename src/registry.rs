//! Source configuration registry.
//!
//! Resolves a logical source type (and optionally a source id) to a fully
//! specified [`SourceConfig`] with its API key attached. Configurations come
//! from a [`SourceCatalog`]:
//!
//! ```text
//! StoreCatalog   → documents of the `sources` collection (production)
//! StaticCatalog  → [[sources]] tables of the config file (local runs, tests)
//! ```
//!
//! Results are memoized per `(source_type, source_id)` for the lifetime of
//! the [`SourceRegistry`] instance. [`SourceRegistry::clear_cache`] is the only
//! way to invalidate them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{IntakeError, Result};
use crate::models::SourceConfig;
use crate::secrets::{resolve_non_empty, SecretStore};
use crate::store::DocumentStore;

// ═══════════════════════════════════════════════════════════════════════
// Catalogs
// ═══════════════════════════════════════════════════════════════════════

/// Somewhere source configurations can be listed from.
#[async_trait]
pub trait SourceCatalog: Send + Sync {
    /// Every known configuration, active or not.
    async fn load(&self) -> Result<Vec<SourceConfig>>;
}

/// Reads configurations from a document-store collection.
///
/// Documents that do not parse as a [`SourceConfig`] are logged and left
/// out; they are authored outside this crate.
pub struct StoreCatalog {
    store: Arc<DocumentStore>,
    collection: String,
    page_size: usize,
}

impl StoreCatalog {
    pub fn new(store: Arc<DocumentStore>, collection: impl Into<String>, page_size: usize) -> Self {
        Self {
            store,
            collection: collection.into(),
            page_size,
        }
    }
}

#[async_trait]
impl SourceCatalog for StoreCatalog {
    async fn load(&self) -> Result<Vec<SourceConfig>> {
        let objects = self
            .store
            .get_data_as_objects(&self.collection, self.page_size)
            .await?;

        let mut configs = Vec::with_capacity(objects.len());
        for obj in &objects {
            match SourceConfig::from_object(obj) {
                Ok(cfg) => configs.push(cfg),
                Err(e) => {
                    let id = obj.get("id").and_then(|v| v.as_str()).unwrap_or("?");
                    tracing::error!(
                        collection = %self.collection,
                        document = id,
                        error = %e,
                        "ignoring unreadable source configuration"
                    );
                }
            }
        }
        Ok(configs)
    }
}

/// A fixed list of configurations.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    sources: Vec<SourceConfig>,
}

impl StaticCatalog {
    pub fn new(sources: Vec<SourceConfig>) -> Self {
        Self { sources }
    }
}

#[async_trait]
impl SourceCatalog for StaticCatalog {
    async fn load(&self) -> Result<Vec<SourceConfig>> {
        Ok(self.sources.clone())
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════

type CacheKey = (String, Option<String>);

/// Resolves and caches source configurations.
pub struct SourceRegistry {
    catalog: Arc<dyn SourceCatalog>,
    secrets: Arc<dyn SecretStore>,
    listing: Mutex<Option<Arc<Vec<SourceConfig>>>>,
    resolved: Mutex<HashMap<CacheKey, Arc<SourceConfig>>>,
    by_type: Mutex<HashMap<String, Vec<Arc<SourceConfig>>>>,
}

impl SourceRegistry {
    pub fn new(catalog: Arc<dyn SourceCatalog>, secrets: Arc<dyn SecretStore>) -> Self {
        Self {
            catalog,
            secrets,
            listing: Mutex::new(None),
            resolved: Mutex::new(HashMap::new()),
            by_type: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve the configuration to use for `source_type`.
    ///
    /// With `source_id`, the active configuration with that id serving the
    /// type. Without, the highest-priority active configuration of the type;
    /// equal priorities resolve to the smallest `source_id`.
    ///
    /// # Errors
    ///
    /// [`IntakeError::ConfigNotFound`] when nothing matches and
    /// [`IntakeError::MissingCredential`] when the match names a secret that
    /// is not set.
    pub async fn source_config(
        &self,
        source_type: &str,
        source_id: Option<&str>,
    ) -> Result<Arc<SourceConfig>> {
        let key = (source_type.to_string(), source_id.map(str::to_string));
        if let Some(hit) = lock(&self.resolved).get(&key) {
            return Ok(Arc::clone(hit));
        }

        let listing = self.listing().await?;
        let candidate = candidates(&listing, source_type)
            .into_iter()
            .find(|cfg| source_id.map_or(true, |id| cfg.source_id == id))
            .ok_or_else(|| IntakeError::ConfigNotFound {
                source_type: source_type.to_string(),
                source_id: source_id.map(str::to_string),
            })?;

        let resolved = Arc::new(self.attach_credentials(candidate)?);
        lock(&self.resolved).insert(key, Arc::clone(&resolved));
        Ok(resolved)
    }

    /// All active configurations of `source_type`, highest priority first.
    ///
    /// Configurations whose credential cannot be resolved are dropped with a
    /// warning.
    pub async fn active_sources_of_type(
        &self,
        source_type: &str,
    ) -> Result<Vec<Arc<SourceConfig>>> {
        if let Some(hit) = lock(&self.by_type).get(source_type) {
            return Ok(hit.clone());
        }

        let listing = self.listing().await?;
        let mut usable = Vec::new();
        for cfg in candidates(&listing, source_type) {
            match self.attach_credentials(cfg) {
                Ok(cfg) => usable.push(Arc::new(cfg)),
                Err(e) => tracing::warn!(
                    source_type,
                    source_id = %cfg.source_id,
                    error = %e,
                    "excluding source"
                ),
            }
        }

        lock(&self.by_type).insert(source_type.to_string(), usable.clone());
        Ok(usable)
    }

    /// Forget every memoized configuration and the catalog listing.
    pub fn clear_cache(&self) {
        *lock(&self.listing) = None;
        lock(&self.resolved).clear();
        lock(&self.by_type).clear();
    }

    async fn listing(&self) -> Result<Arc<Vec<SourceConfig>>> {
        if let Some(listing) = lock(&self.listing).as_ref() {
            return Ok(Arc::clone(listing));
        }
        let loaded = Arc::new(self.catalog.load().await?);
        tracing::debug!(sources = loaded.len(), "loaded source catalog");
        *lock(&self.listing) = Some(Arc::clone(&loaded));
        Ok(loaded)
    }

    fn attach_credentials(&self, cfg: &SourceConfig) -> Result<SourceConfig> {
        let mut cfg = cfg.clone();
        if let Some(key_name) = cfg.api_key_name.as_deref().filter(|n| !n.trim().is_empty()) {
            let value = resolve_non_empty(self.secrets.as_ref(), key_name).ok_or_else(|| {
                IntakeError::MissingCredential {
                    source_id: cfg.source_id.clone(),
                    key_name: key_name.to_string(),
                }
            })?;
            cfg.api_key = Some(value);
        }
        Ok(cfg)
    }
}

/// Active configurations serving `source_type`, ordered by descending
/// priority then ascending `source_id`.
fn candidates<'a>(listing: &'a [SourceConfig], source_type: &str) -> Vec<&'a SourceConfig> {
    let mut matches: Vec<&SourceConfig> = listing
        .iter()
        .filter(|cfg| cfg.is_active && cfg.serves(source_type))
        .collect();
    matches.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.source_id.cmp(&b.source_id))
    });
    matches
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}
