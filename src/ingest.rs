//! Keyword sweeps: from monitored entities to queued tasks.
//!
//! Coordinates the full flow for a set of source types:
//!
//! ```text
//! entities → keyword pool → OR-query chunks → fetch → map → attribute → tasks → batch upsert
//! ```
//!
//! Every active source of a type receives `ceil(keywords / chunk_size)`
//! requests, issued strictly in order. Items are attributed to every entity
//! whose keyword occurs in the item's title or summary; items matching no
//! keyword are dropped.
//!
//! Failures of one chunk (transport, provider status, decode) are recorded in
//! the caller's [`ErrorPolicy`] and do not abort the rest of the sweep.
//! Configuration and auth failures propagate immediately.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{IntakeError, Result};
use crate::fetch::{placeholders, FetchOptions, Params, RequestFetcher};
use crate::mapping::map_items;
use crate::models::{MonitoredEntity, QueuedTask, SourceConfig, TASK_STATUS_PENDING};
use crate::registry::SourceRegistry;
use crate::store::{BatchOutcome, DocumentStore};

/// Keywords per OR-query for sources without an entry in
/// [`SOURCE_QUERY_CHUNK_SIZE`] or an explicit `query_chunk_size`.
pub const DEFAULT_QUERY_CHUNK_SIZE: usize = 5;

/// Known providers' query-complexity tolerance, keyed by `source_id`.
pub const SOURCE_QUERY_CHUNK_SIZE: &[(&str, usize)] = &[
    ("newsapi", 20),
    ("gnews", 10),
    ("hackernews", 8),
    ("arxiv", 10),
    ("semantic_scholar", 5),
    ("github", 5),
    ("patentsview", 5),
    ("alpha_vantage", 1),
    ("finnhub", 1),
];

/// Chunk size for a source: its own override, the table, or the default.
pub fn chunk_size_for(config: &SourceConfig) -> usize {
    config
        .query_chunk_size
        .or_else(|| {
            SOURCE_QUERY_CHUNK_SIZE
                .iter()
                .find(|(id, _)| *id == config.source_id)
                .map(|(_, size)| *size)
        })
        .unwrap_or(DEFAULT_QUERY_CHUNK_SIZE)
        .max(1)
}

// ═══════════════════════════════════════════════════════════════════════
// Planning
// ═══════════════════════════════════════════════════════════════════════

/// Deduplicated keyword pool plus `lower-cased keyword → entity ids`.
///
/// The pool keeps each keyword's first spelling for queries and path
/// placeholders; only attribution compares lower-cased text.
#[derive(Debug, Clone, Default)]
pub struct KeywordIndex {
    pool: Vec<String>,
    owners: BTreeMap<String, BTreeSet<String>>,
}

impl KeywordIndex {
    /// Index the search keywords of every entity. Pool order follows first
    /// appearance.
    pub fn build(entities: &[MonitoredEntity]) -> Self {
        let mut index = Self::default();
        for entity in entities {
            for keyword in entity.search_keywords() {
                let owners = index.owners.entry(keyword.to_lowercase()).or_default();
                if owners.is_empty() {
                    index.pool.push(keyword);
                }
                owners.insert(entity.entity_id.clone());
            }
        }
        index
    }

    pub fn pool(&self) -> &[String] {
        &self.pool
    }

    /// Entities owning `keyword`, in any case.
    pub fn owners(&self, keyword: &str) -> Option<&BTreeSet<String>> {
        self.owners.get(&keyword.to_lowercase())
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }
}

/// One OR-query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryChunk {
    pub keywords: Vec<String>,
    /// `"kw1" OR "kw2" ...`
    pub query: String,
}

/// Split `pool` into `ceil(N / size)` consecutive chunks.
pub fn plan_queries(pool: &[String], size: usize) -> Vec<QueryChunk> {
    pool.chunks(size.max(1))
        .map(|keywords| QueryChunk {
            keywords: keywords.to_vec(),
            query: keywords
                .iter()
                .map(|k| format!("\"{}\"", k))
                .collect::<Vec<_>>()
                .join(" OR "),
        })
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════
// Attribution
// ═══════════════════════════════════════════════════════════════════════

/// Entities an item was attributed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribution {
    /// Smallest matching entity id.
    pub trigger_entity_id: String,
    /// All matching entity ids, sorted.
    pub linked_entity_ids: Vec<String>,
}

/// Case-insensitive keyword scan of `title + " " + summary`.
///
/// Returns `None` when no keyword occurs.
pub fn attribute(item: &Map<String, Value>, index: &KeywordIndex) -> Option<Attribution> {
    let text_of = |key: &str| item.get(key).and_then(Value::as_str).unwrap_or_default();
    let haystack = format!("{} {}", text_of("title"), text_of("summary")).to_lowercase();

    let matched: BTreeSet<&String> = index
        .owners
        .iter()
        .filter(|(keyword, _)| haystack.contains(keyword.as_str()))
        .flat_map(|(_, ids)| ids)
        .collect();

    let mut ids = matched.into_iter().cloned();
    let trigger = ids.next()?;
    let mut linked = vec![trigger.clone()];
    linked.extend(ids);
    Some(Attribution {
        trigger_entity_id: trigger,
        linked_entity_ids: linked,
    })
}

/// Stable task id: SHA-256 of the source id and the item's url, or of the
/// item's canonical JSON when it has no url.
pub fn task_id(source_id: &str, item: &Map<String, Value>) -> String {
    let identity = match item.get("url").and_then(Value::as_str) {
        Some(url) if !url.trim().is_empty() => url.trim().to_string(),
        _ => Value::Object(item.clone()).to_string(),
    };
    let mut hasher = Sha256::new();
    hasher.update(source_id.as_bytes());
    hasher.update(b"\n");
    hasher.update(identity.as_bytes());
    hex::encode(hasher.finalize())
}

/// Build the pending task for an attributed item.
pub fn build_task(
    source_id: &str,
    task_type: &str,
    item: &Map<String, Value>,
    attribution: Attribution,
    now: DateTime<Utc>,
) -> QueuedTask {
    let mut payload = item.clone();
    payload.insert(
        "trigger_entity_id".to_string(),
        Value::String(attribution.trigger_entity_id),
    );
    payload.insert(
        "all_linked_entity_ids".to_string(),
        Value::Array(
            attribution
                .linked_entity_ids
                .into_iter()
                .map(Value::String)
                .collect(),
        ),
    );

    QueuedTask {
        id: task_id(source_id, item),
        task_type: task_type.to_string(),
        task_status: TASK_STATUS_PENDING.to_string(),
        payload,
        source_id: source_id.to_string(),
        created_timestamp: now,
        retry_count: 0,
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Sweep
// ═══════════════════════════════════════════════════════════════════════

/// What to do with a per-chunk failure inside a sweep.
///
/// Configuration and auth failures always abort the sweep, whatever the mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ErrorMode {
    /// Count and log chunk failures, keep going.
    #[default]
    ContinueOnError,
    /// Abort on the first failure of any kind.
    FailFast,
}

/// Failure counter threaded through a sweep.
#[derive(Debug, Default)]
pub struct ErrorPolicy {
    mode: ErrorMode,
    errors: usize,
}

impl ErrorPolicy {
    pub fn new(mode: ErrorMode) -> Self {
        Self { mode, errors: 0 }
    }

    pub fn continue_on_error() -> Self {
        Self::new(ErrorMode::ContinueOnError)
    }

    pub fn fail_fast() -> Self {
        Self::new(ErrorMode::FailFast)
    }

    pub fn mode(&self) -> ErrorMode {
        self.mode
    }

    /// Failures recorded so far.
    pub fn errors(&self) -> usize {
        self.errors
    }

    /// Count `err`. Returns it back when the sweep must stop.
    pub fn record(&mut self, err: IntakeError) -> Result<()> {
        self.errors += 1;
        if err.is_configuration() || self.mode == ErrorMode::FailFast {
            return Err(err);
        }
        Ok(())
    }
}

/// Fixed parameters of a sweep.
#[derive(Debug, Clone)]
pub struct SweepSettings {
    /// Endpoint key requested from every source.
    pub endpoint_key: String,
    /// `task_type` of the queued tasks.
    pub task_type: String,
    /// Collection the tasks are upserted into.
    pub tasks_collection: String,
    /// Sent as the generic `page_size` parameter to sources that map it.
    pub page_size: Option<usize>,
    pub fetch: FetchOptions,
}

/// Counters for one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub sources_queried: usize,
    /// Sources whose endpoint shape cannot carry their chunk size.
    pub skipped_sources: usize,
    pub chunks_issued: usize,
    pub chunks_failed: usize,
    pub items_fetched: usize,
    /// Items matching no keyword.
    pub items_dropped: usize,
    /// Items already seen earlier in the same sweep.
    pub duplicates: usize,
    pub tasks_built: usize,
    pub write: BatchOutcome,
}

/// Tasks collected by a sweep, not yet written.
#[derive(Debug, Clone, Default)]
pub struct SweepOutput {
    pub tasks: Vec<QueuedTask>,
    pub report: SweepReport,
}

/// Runs keyword sweeps across sources.
pub struct IngestSweep {
    registry: Arc<SourceRegistry>,
    fetcher: Arc<RequestFetcher>,
    settings: SweepSettings,
}

impl IngestSweep {
    pub fn new(
        registry: Arc<SourceRegistry>,
        fetcher: Arc<RequestFetcher>,
        settings: SweepSettings,
    ) -> Self {
        Self {
            registry,
            fetcher,
            settings,
        }
    }

    /// Query every active source of each type and build tasks.
    ///
    /// Configuration and auth failures return an error. Chunk failures are
    /// counted in `policy` and only abort under [`ErrorMode::FailFast`].
    pub async fn collect(
        &self,
        source_types: &[String],
        entities: &[MonitoredEntity],
        policy: &mut ErrorPolicy,
    ) -> Result<SweepOutput> {
        let active: Vec<MonitoredEntity> =
            entities.iter().filter(|e| e.is_active()).cloned().collect();
        let index = KeywordIndex::build(&active);
        let mut output = SweepOutput::default();

        if index.is_empty() {
            tracing::info!("no keywords to sweep");
            return Ok(output);
        }

        let now = self.settings.fetch.now.unwrap_or_else(Utc::now);
        let run_id = Uuid::new_v4();
        let mut seen: HashSet<String> = HashSet::new();
        tracing::info!(
            %run_id,
            keywords = index.pool().len(),
            source_types = source_types.len(),
            "sweep started"
        );

        for source_type in source_types {
            let sources = match self.registry.active_sources_of_type(source_type).await {
                Ok(sources) if sources.is_empty() => {
                    tracing::warn!(source_type = %source_type, "no active sources");
                    policy.record(IntakeError::ConfigNotFound {
                        source_type: source_type.clone(),
                        source_id: None,
                    })?;
                    continue;
                }
                Ok(sources) => sources,
                Err(e) => {
                    tracing::warn!(source_type = %source_type, error = %e, "cannot resolve sources");
                    policy.record(e)?;
                    continue;
                }
            };

            for config in sources {
                self.sweep_source(&config, &index, now, &mut seen, &mut output, policy)
                    .await?;
            }
        }

        output.report.tasks_built = output.tasks.len();
        tracing::info!(
            %run_id,
            sources = output.report.sources_queried,
            chunks = output.report.chunks_issued,
            failed = output.report.chunks_failed,
            items = output.report.items_fetched,
            tasks = output.report.tasks_built,
            "sweep collected"
        );
        Ok(output)
    }

    async fn sweep_source(
        &self,
        config: &SourceConfig,
        index: &KeywordIndex,
        now: DateTime<Utc>,
        seen: &mut HashSet<String>,
        output: &mut SweepOutput,
        policy: &mut ErrorPolicy,
    ) -> Result<()> {
        let endpoint = &self.settings.endpoint_key;
        let Some(template) = config.endpoint_paths.get(endpoint) else {
            tracing::warn!(source_id = %config.source_id, endpoint = %endpoint, "source lacks endpoint");
            return policy.record(IntakeError::InvalidEndpoint {
                source_id: config.source_id.clone(),
                endpoint: endpoint.clone(),
                reason: "unknown endpoint key".to_string(),
            });
        };

        let size = chunk_size_for(config);
        let slots = placeholders(template);
        let slot = match slots.as_slice() {
            [] => None,
            [name] if size == 1 => Some(name.clone()),
            _ => {
                tracing::warn!(
                    source_id = %config.source_id,
                    chunk_size = size,
                    placeholders = slots.len(),
                    "endpoint takes one identifier per call; skipping source"
                );
                output.report.skipped_sources += 1;
                return Ok(());
            }
        };

        output.report.sources_queried += 1;

        for chunk in plan_queries(index.pool(), size) {
            let mut params = Params::new();
            match &slot {
                Some(name) => {
                    params.insert(name.clone(), Value::String(chunk.keywords[0].clone()));
                }
                None => {
                    params.insert("q".to_string(), Value::String(chunk.query.clone()));
                }
            }
            if let Some(page_size) = self.settings.page_size {
                if config.pagination_param_names.contains_key("page_size") {
                    params.insert("page_size".to_string(), Value::from(page_size));
                }
            }

            output.report.chunks_issued += 1;
            let body = match self
                .fetcher
                .fetch(config, endpoint, &params, &self.settings.fetch)
                .await
            {
                Ok(body) => body,
                Err(e) => {
                    tracing::warn!(
                        source_id = %config.source_id,
                        keywords = chunk.keywords.len(),
                        error = %e,
                        "chunk failed"
                    );
                    output.report.chunks_failed += 1;
                    policy.record(e)?;
                    continue;
                }
            };

            let items = map_items(&body, &config.response_mapping_rules);
            output.report.items_fetched += items.len();

            for item in &items {
                let Some(attribution) = attribute(item, index) else {
                    output.report.items_dropped += 1;
                    continue;
                };
                let task = build_task(
                    &config.source_id,
                    &self.settings.task_type,
                    item,
                    attribution,
                    now,
                );
                if seen.insert(task.id.clone()) {
                    output.tasks.push(task);
                } else {
                    output.report.duplicates += 1;
                }
            }
        }

        Ok(())
    }

    /// [`collect`](Self::collect), then upsert the tasks into the tasks
    /// collection.
    pub async fn run(
        &self,
        store: &DocumentStore,
        source_types: &[String],
        entities: &[MonitoredEntity],
        policy: &mut ErrorPolicy,
    ) -> Result<SweepReport> {
        let SweepOutput { tasks, mut report } =
            self.collect(source_types, entities, policy).await?;
        if tasks.is_empty() {
            return Ok(report);
        }

        let objects: Vec<_> = tasks.iter().map(QueuedTask::to_object).collect();
        report.write = store
            .batch_upsert(&self.settings.tasks_collection, &objects, "id")
            .await?;
        tracing::info!(
            written = report.write.written,
            failed = report.write.failed,
            "tasks enqueued"
        );
        Ok(report)
    }
}

/// Read the active monitored entities of a collection.
///
/// Documents that do not describe an entity are logged and skipped.
pub async fn load_monitored_entities(
    store: &DocumentStore,
    collection: &str,
    page_size: usize,
) -> Result<Vec<MonitoredEntity>> {
    let objects = store.get_data_as_objects(collection, page_size).await?;
    let mut entities = Vec::with_capacity(objects.len());
    for obj in &objects {
        let mut json = crate::codec::object_to_json(obj);
        // `id` is an alias of `entity_id`; both present is a duplicate field.
        if let Value::Object(map) = &mut json {
            if map.contains_key("entity_id") {
                map.remove("id");
            }
        }
        match serde_json::from_value::<MonitoredEntity>(json) {
            Ok(entity) if entity.is_active() => entities.push(entity),
            Ok(_) => {}
            Err(e) => tracing::warn!(collection, error = %e, "skipping unreadable entity"),
        }
    }
    Ok(entities)
}
