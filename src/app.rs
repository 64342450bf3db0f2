//! Component wiring from a loaded [`Config`].
//!
//! The store is only constructed when a command needs it, so local runs
//! with `[[sources]]` tables work without credentials.

use anyhow::{bail, Context, Result};
use std::sync::Arc;

use crate::ai::{AiInvoker, AiSettings};
use crate::auth::{ServiceAccountKey, ServiceAccountTokenManager, StaticToken, TokenSource};
use crate::config::Config;
use crate::fetch::{FetchOptions, RequestFetcher};
use crate::ingest::{IngestSweep, SweepSettings};
use crate::registry::{SourceCatalog, SourceRegistry, StaticCatalog, StoreCatalog};
use crate::store::{DocumentStore, StoreSettings};

/// The library components of one process run.
pub struct App {
    pub config: Config,
    pub registry: Arc<SourceRegistry>,
    pub fetcher: Arc<RequestFetcher>,
    store: Option<Arc<DocumentStore>>,
}

impl App {
    /// Build the registry from local sources when configured, otherwise from
    /// the store's sources collection.
    pub fn from_config(config: Config) -> Result<Self> {
        let fetcher = Arc::new(RequestFetcher::new(config.http.timeout())?);

        let (catalog, store): (Arc<dyn SourceCatalog>, Option<Arc<DocumentStore>>) =
            if config.has_local_sources() {
                (
                    Arc::new(StaticCatalog::new(config.sources.clone())),
                    None,
                )
            } else {
                let store = Arc::new(build_store(&config)?);
                (
                    Arc::new(StoreCatalog::new(
                        Arc::clone(&store),
                        config.store.sources_collection.clone(),
                        config.store.page_size,
                    )),
                    Some(store),
                )
            };

        let registry = Arc::new(SourceRegistry::new(
            catalog,
            Arc::new(config.secret_store()),
        ));

        Ok(Self {
            config,
            registry,
            fetcher,
            store,
        })
    }

    /// The document store, constructing it on first use.
    pub fn store(&mut self) -> Result<Arc<DocumentStore>> {
        if let Some(store) = &self.store {
            return Ok(Arc::clone(store));
        }
        let store = Arc::new(build_store(&self.config)?);
        self.store = Some(Arc::clone(&store));
        Ok(store)
    }

    pub fn ai(&self) -> AiInvoker {
        AiInvoker::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.fetcher),
            AiSettings {
                completion_source_type: self.config.ai.completion_source_type.clone(),
                embedding_source_type: self.config.ai.embedding_source_type.clone(),
                temperature: self.config.ai.temperature,
            },
        )
    }

    pub fn sweep(&self) -> IngestSweep {
        let ingest = &self.config.ingest;
        IngestSweep::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.fetcher),
            SweepSettings {
                endpoint_key: ingest.endpoint_key.clone(),
                task_type: ingest.task_type.clone(),
                tasks_collection: self.config.store.tasks_collection.clone(),
                page_size: ingest.page_size,
                fetch: FetchOptions {
                    lookback_days: ingest.lookback_days,
                    ..Default::default()
                },
            },
        )
    }
}

/// Connect to the document store described by `[store]`.
pub fn build_store(config: &Config) -> Result<DocumentStore> {
    let sc = &config.store;
    let timeout = config.http.timeout();

    let (tokens, key_project): (Arc<dyn TokenSource>, Option<String>) = if sc.emulator {
        (Arc::new(StaticToken::new(sc.emulator_token.clone())), None)
    } else {
        let Some(path) = &sc.credentials_path else {
            bail!("store.credentials_path is required unless store.emulator = true");
        };
        let key = ServiceAccountKey::from_file(path)
            .with_context(|| format!("Failed to load credentials from {}", path.display()))?;
        let project = key.project_id.clone();
        let manager = ServiceAccountTokenManager::new(
            key,
            sc.scope.as_deref(),
            sc.token_uri.as_deref(),
            timeout,
        )?;
        (Arc::new(manager), project)
    };

    let Some(project_id) = sc.project_id.clone().or(key_project) else {
        bail!("store.project_id is required (or a key file with project_id)");
    };

    let mut settings = StoreSettings::new(project_id).with_api_base(sc.api_base.clone());
    settings.database_id = sc.database_id.clone();
    settings.timeout = timeout;

    Ok(DocumentStore::new(settings, tokens)?)
}
