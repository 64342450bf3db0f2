//! Document-store gateway.
//!
//! Talks to the store's REST API directly: point reads and writes,
//! paginated collection scans, and batched commits. Every request carries a
//! bearer token from a [`TokenSource`]; field values are converted with the
//! [`codec`](crate::codec).
//!
//! # Pagination
//!
//! [`DocumentStore::query_collection`] follows `nextPageToken` until the
//! store stops returning one, accumulating documents in page order. A fresh
//! call always starts again from the first page.
//!
//! # Batched writes
//!
//! The commit endpoint accepts a bounded number of writes per request.
//! [`DocumentStore::batch_write`] splits its input into chunks of at most
//! [`MAX_WRITES_PER_COMMIT`] and commits them in order. Chunks are
//! independent: a failure in chunk *k* leaves chunks `1..k-1` committed and
//! the remaining chunks are still attempted. Callers should treat batched
//! writes as at-least-once.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::TokenSource;
use crate::codec::{self, DocObject, DocValue, TypedValue};
use crate::error::{truncate_body, IntakeError, Result};

/// Upper bound on writes in a single commit request.
pub const MAX_WRITES_PER_COMMIT: usize = 499;

pub const DEFAULT_API_BASE: &str = "https://firestore.googleapis.com/v1";
pub const DEFAULT_DATABASE_ID: &str = "(default)";

/// A stored document as returned by the API.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Full resource name: `projects/{p}/databases/{d}/documents/{path}`.
    pub name: String,
    /// Raw wire fields. Use [`Document::decoded`] for plain values.
    #[serde(default)]
    pub fields: serde_json::Map<String, Value>,
    #[serde(default)]
    pub create_time: Option<String>,
    #[serde(default)]
    pub update_time: Option<String>,
}

impl Document {
    /// The last path segment of the document name.
    pub fn id(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }

    /// Decoded fields (best-effort; unknown variants are dropped).
    pub fn decoded(&self) -> DocObject {
        codec::decode_fields(&self.fields)
    }

    /// Decoded fields plus an `id` entry, unless a field named `id` exists.
    pub fn to_object(&self) -> DocObject {
        let mut obj = self.decoded();
        obj.entry("id".to_string())
            .or_insert_with(|| DocValue::String(self.id().to_string()));
        obj
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListDocumentsResponse {
    #[serde(default)]
    documents: Vec<Document>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// One write inside a commit request.
#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    /// Set the listed fields; fields outside `mask` are left untouched.
    Update {
        name: String,
        fields: BTreeMap<String, TypedValue>,
        mask: Vec<String>,
    },
    Delete { name: String },
}

impl Write {
    fn to_wire(&self) -> Value {
        match self {
            Write::Update { name, fields, mask } => json!({
                "update": { "name": name, "fields": fields },
                "updateMask": {
                    "fieldPaths": mask.iter().map(|f| quote_field_path(f)).collect::<Vec<_>>()
                },
            }),
            Write::Delete { name } => json!({ "delete": name }),
        }
    }
}

/// Aggregate result of a batched operation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Commit requests that succeeded.
    pub commits: usize,
    /// Writes contained in successful commits.
    pub written: usize,
    /// Commit requests that failed.
    pub failed_chunks: usize,
    /// Writes contained in failed commits.
    pub failed: usize,
    /// Input records dropped before building writes (e.g. missing id).
    pub skipped: usize,
}

impl BatchOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }
}

/// Connection settings for [`DocumentStore`].
#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub api_base: String,
    pub project_id: String,
    pub database_id: String,
    pub timeout: Duration,
}

impl StoreSettings {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            project_id: project_id.into(),
            database_id: DEFAULT_DATABASE_ID.to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }
}

/// Authenticated client for one database.
pub struct DocumentStore {
    client: reqwest::Client,
    api_base: String,
    database: String,
    tokens: Arc<dyn TokenSource>,
}

impl DocumentStore {
    pub fn new(settings: StoreSettings, tokens: Arc<dyn TokenSource>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()?;
        Ok(Self {
            client,
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            database: format!(
                "projects/{}/databases/{}",
                settings.project_id, settings.database_id
            ),
            tokens,
        })
    }

    /// Full resource name for a document path such as `tasks/abc`.
    pub fn document_name(&self, path: &str) -> String {
        format!("{}/documents/{}", self.database, path.trim_matches('/'))
    }

    fn documents_url(&self, path: &str) -> String {
        let encoded = path
            .trim_matches('/')
            .split('/')
            .map(uri_encode)
            .collect::<Vec<_>>()
            .join("/");
        format!("{}/{}/documents/{}", self.api_base, self.database, encoded)
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let token = self.tokens.token().await?;
        let resp = builder.bearer_auth(token).send().await?;
        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            // Next call re-authenticates instead of reusing a rejected token.
            self.tokens.invalidate();
        }
        Ok(resp)
    }

    async fn error_from(resp: reqwest::Response) -> IntakeError {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        IntakeError::Store {
            status,
            body: truncate_body(&body, 500),
        }
    }

    /// Fetch one document. A missing document is `Ok(None)`.
    pub async fn get(&self, path: &str) -> Result<Option<Document>> {
        let resp = self.send(self.client.get(self.documents_url(path))).await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(Self::error_from(resp).await);
        }
        let doc: Document = resp
            .json()
            .await
            .map_err(|e| IntakeError::Decode(format!("document {}: {}", path, e)))?;
        Ok(Some(doc))
    }

    /// Fetch one document as a plain object with an `id` entry.
    pub async fn get_object(&self, path: &str) -> Result<Option<DocObject>> {
        Ok(self.get(path).await?.map(|d| d.to_object()))
    }

    /// Partially update (or create) a document: only the keys present in
    /// `fields` are written; other stored fields are left untouched.
    pub async fn update(&self, path: &str, fields: &DocObject) -> Result<Document> {
        let mask: Vec<(&str, String)> = fields
            .keys()
            .map(|k| ("updateMask.fieldPaths", quote_field_path(k)))
            .collect();
        let body = json!({ "fields": codec::encode_fields(fields) });

        let builder = self
            .client
            .patch(self.documents_url(path))
            .query(&mask)
            .json(&body);
        let resp = self.send(builder).await?;
        if !resp.status().is_success() {
            return Err(Self::error_from(resp).await);
        }
        resp.json()
            .await
            .map_err(|e| IntakeError::Decode(format!("update response for {}: {}", path, e)))
    }

    /// Delete a document. Deleting a missing document is not an error.
    pub async fn delete(&self, path: &str) -> Result<()> {
        let resp = self
            .send(self.client.delete(self.documents_url(path)))
            .await?;
        if !resp.status().is_success() {
            return Err(Self::error_from(resp).await);
        }
        Ok(())
    }

    /// Read every document of a collection, following continuation tokens.
    pub async fn query_collection(
        &self,
        collection: &str,
        page_size: usize,
    ) -> Result<Vec<Document>> {
        let url = self.documents_url(collection);
        let mut documents = Vec::new();
        let mut page_token: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let mut query = vec![("pageSize".to_string(), page_size.max(1).to_string())];
            if let Some(ref token) = page_token {
                query.push(("pageToken".to_string(), token.clone()));
            }

            let resp = self.send(self.client.get(&url).query(&query)).await?;
            if !resp.status().is_success() {
                return Err(Self::error_from(resp).await);
            }
            let page: ListDocumentsResponse = resp.json().await.map_err(|e| {
                IntakeError::Decode(format!("list response for {}: {}", collection, e))
            })?;
            pages += 1;
            documents.extend(page.documents);

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        tracing::debug!(
            collection,
            pages,
            documents = documents.len(),
            "collection scan complete"
        );
        Ok(documents)
    }

    /// Read a whole collection as plain objects, each with an `id` entry.
    pub async fn get_data_as_objects(
        &self,
        collection: &str,
        page_size: usize,
    ) -> Result<Vec<DocObject>> {
        Ok(self
            .query_collection(collection, page_size)
            .await?
            .iter()
            .map(Document::to_object)
            .collect())
    }

    /// Commit `writes` in chunks of at most [`MAX_WRITES_PER_COMMIT`].
    ///
    /// A failed chunk is logged and counted; later chunks still run. Only a
    /// failure to obtain a token aborts the batch.
    pub async fn batch_write(&self, writes: Vec<Write>) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        if writes.is_empty() {
            return Ok(outcome);
        }

        let url = format!("{}/{}/documents:commit", self.api_base, self.database);
        let total_chunks = writes.len().div_ceil(MAX_WRITES_PER_COMMIT);

        for (index, chunk) in writes.chunks(MAX_WRITES_PER_COMMIT).enumerate() {
            let body = json!({
                "writes": chunk.iter().map(Write::to_wire).collect::<Vec<_>>()
            });

            let result = match self.send(self.client.post(&url).json(&body)).await {
                Ok(resp) if resp.status().is_success() => Ok(()),
                Ok(resp) => Err(Self::error_from(resp).await),
                Err(e @ IntakeError::Http(_)) => Err(e),
                Err(e) => return Err(e),
            };

            match result {
                Ok(()) => {
                    outcome.commits += 1;
                    outcome.written += chunk.len();
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        chunk = index + 1,
                        total_chunks,
                        writes = chunk.len(),
                        "batch commit failed"
                    );
                    outcome.failed_chunks += 1;
                    outcome.failed += chunk.len();
                }
            }
        }

        Ok(outcome)
    }

    /// Create or fully replace one document per object.
    ///
    /// The document id is taken from `id_field` (string or integer) and the
    /// field itself is stripped from the stored payload. Objects without a
    /// usable id are skipped and counted in [`BatchOutcome::skipped`].
    pub async fn batch_upsert(
        &self,
        collection: &str,
        objects: &[DocObject],
        id_field: &str,
    ) -> Result<BatchOutcome> {
        let mut skipped = 0usize;
        let mut writes = Vec::with_capacity(objects.len());

        for obj in objects {
            let id = match obj.get(id_field) {
                Some(DocValue::String(s)) if !s.trim().is_empty() => s.clone(),
                Some(DocValue::Integer(i)) => i.to_string(),
                _ => {
                    tracing::warn!(collection, id_field, "skipping object without id");
                    skipped += 1;
                    continue;
                }
            };

            let mut payload = obj.clone();
            payload.remove(id_field);
            let mask: Vec<String> = payload.keys().cloned().collect();

            writes.push(Write::Update {
                name: self.document_name(&format!("{}/{}", collection, id)),
                fields: codec::encode_fields(&payload),
                mask,
            });
        }

        let mut outcome = self.batch_write(writes).await?;
        outcome.skipped = skipped;
        Ok(outcome)
    }

    /// Delete documents of a collection by id, batched like writes.
    pub async fn batch_delete(&self, collection: &str, ids: &[String]) -> Result<BatchOutcome> {
        let writes = ids
            .iter()
            .map(|id| Write::Delete {
                name: self.document_name(&format!("{}/{}", collection, id)),
            })
            .collect();
        self.batch_write(writes).await
    }
}

/// Quote a field name for use in a field path if it is not a plain
/// identifier (`[A-Za-z_][A-Za-z0-9_]*`).
pub fn quote_field_path(field: &str) -> String {
    let mut chars = field.chars();
    let simple = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if simple {
        field.to_string()
    } else {
        format!("`{}`", field.replace('\\', "\\\\").replace('`', "\\`"))
    }
}

/// Percent-encode one path segment (RFC 3986 unreserved characters kept).
pub(crate) fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}
