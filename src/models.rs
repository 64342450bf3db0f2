//! Core data models used throughout Intake Harness.
//!
//! These types describe external sources, the entities being monitored, and
//! the task records that flow from ingestion into the document store.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::codec::{DocObject, DocValue};
use crate::mapping::MappingRules;

/// Initial status of every queued task.
pub const TASK_STATUS_PENDING: &str = "PENDING";

/// HTTP verb used for a source's requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    #[serde(alias = "get")]
    Get,
    #[serde(alias = "post")]
    Post,
    #[serde(alias = "put")]
    Put,
    #[serde(alias = "patch")]
    Patch,
    #[serde(alias = "delete")]
    Delete,
}

/// How non-GET parameters are serialized into the request body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadType {
    #[default]
    None,
    Json,
    Form,
}

/// How a successful response body is decoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    #[default]
    Json,
    Xml,
    Text,
}

/// Where the provider's API key is injected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    #[default]
    None,
    HeaderKey,
    BearerToken,
    QueryParamKey,
}

/// Declarative description of one external API.
///
/// Stored as a document (or a `[[sources]]` table in the config file) and
/// read-only to this crate. `api_key` is never stored; the registry fills it
/// in from secret storage when the configuration is resolved.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub source_id: String,
    /// Source types this provider serves (e.g. `news`, `papers`).
    #[serde(deserialize_with = "one_or_many")]
    pub source_type: BTreeSet<String>,
    /// Display name used in logs and errors. Defaults to `source_id`.
    #[serde(default)]
    pub name: Option<String>,
    pub base_url: String,
    /// Endpoint key → path template (may contain `{placeholder}` segments).
    #[serde(default)]
    pub endpoint_paths: BTreeMap<String, String>,
    #[serde(default)]
    pub request_method: HttpMethod,
    #[serde(default)]
    pub payload_type: PayloadType,
    #[serde(default)]
    pub response_type: ResponseType,
    #[serde(default)]
    pub auth_method: AuthMethod,
    /// Name of the secret holding the API key.
    #[serde(default)]
    pub api_key_name: Option<String>,
    #[serde(default)]
    pub api_key_header_name: Option<String>,
    #[serde(default)]
    pub api_key_query_param_name: Option<String>,
    #[serde(default)]
    pub fixed_query_params: BTreeMap<String, Value>,
    /// Generic parameter name → provider parameter name.
    #[serde(default)]
    pub dynamic_param_names: BTreeMap<String, String>,
    #[serde(default)]
    pub pagination_param_names: BTreeMap<String, String>,
    #[serde(default)]
    pub time_filter_param_name: Option<String>,
    #[serde(default)]
    pub default_lookback_days: Option<u32>,
    #[serde(default)]
    pub response_mapping_rules: MappingRules,
    /// Keywords per OR-query; overrides the built-in table when set.
    #[serde(default)]
    pub query_chunk_size: Option<usize>,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub is_active: bool,
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl SourceConfig {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.source_id)
    }

    pub fn serves(&self, source_type: &str) -> bool {
        self.source_type.contains(source_type)
    }

    /// Build from a decoded store document. The document id stands in for a
    /// missing `source_id`.
    pub fn from_object(obj: &DocObject) -> Result<Self, serde_json::Error> {
        let mut json = match crate::codec::object_to_json(obj) {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        if let Some(id) = json.remove("id") {
            json.entry("source_id".to_string()).or_insert(id);
        }
        serde_json::from_value(Value::Object(json))
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<BTreeSet<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => BTreeSet::from([s]),
        OneOrMany::Many(v) => v.into_iter().collect(),
    })
}

/// An organization, technology, or other subject being watched.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct MonitoredEntity {
    #[serde(alias = "id")]
    pub entity_id: String,
    #[serde(default)]
    pub entity_type: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Explicit search keywords; when empty, name and aliases are used.
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default = "default_monitoring_status")]
    pub monitoring_status: String,
}

fn default_monitoring_status() -> String {
    "active".to_string()
}

impl MonitoredEntity {
    pub fn is_active(&self) -> bool {
        self.monitoring_status.eq_ignore_ascii_case("active")
    }

    /// Trimmed keywords in first-seen order, deduplicated ignoring case.
    ///
    /// The first spelling is kept: identifier endpoints receive it verbatim.
    pub fn search_keywords(&self) -> Vec<String> {
        let source: Vec<&String> = if self.keywords.is_empty() {
            std::iter::once(&self.name).chain(&self.aliases).collect()
        } else {
            self.keywords.iter().collect()
        };

        let mut seen = BTreeSet::new();
        source
            .into_iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty() && seen.insert(k.to_lowercase()))
            .collect()
    }
}

/// A unit of downstream work derived from one attributed item.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedTask {
    pub id: String,
    pub task_type: String,
    pub task_status: String,
    /// Mapped item plus `trigger_entity_id` and `all_linked_entity_ids`.
    pub payload: Map<String, Value>,
    pub source_id: String,
    pub created_timestamp: DateTime<Utc>,
    pub retry_count: u32,
}

impl QueuedTask {
    pub fn trigger_entity_id(&self) -> Option<&str> {
        self.payload.get("trigger_entity_id").and_then(Value::as_str)
    }

    pub fn linked_entity_ids(&self) -> Vec<&str> {
        self.payload
            .get("all_linked_entity_ids")
            .and_then(Value::as_array)
            .map(|ids| ids.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    /// Plain-object form for [`DocumentStore::batch_upsert`](crate::store::DocumentStore::batch_upsert)
    /// keyed by `id`.
    pub fn to_object(&self) -> DocObject {
        let mut obj = DocObject::new();
        obj.insert("id".into(), DocValue::String(self.id.clone()));
        obj.insert("task_type".into(), DocValue::String(self.task_type.clone()));
        obj.insert(
            "task_status".into(),
            DocValue::String(self.task_status.clone()),
        );
        obj.insert(
            "payload".into(),
            DocValue::from_json(&Value::Object(self.payload.clone())),
        );
        obj.insert("source_id".into(), DocValue::String(self.source_id.clone()));
        obj.insert(
            "created_timestamp".into(),
            DocValue::Timestamp(self.created_timestamp),
        );
        obj.insert(
            "retry_count".into(),
            DocValue::Integer(i64::from(self.retry_count)),
        );
        obj
    }
}
