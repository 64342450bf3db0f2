//! Chat-completion and embedding calls.
//!
//! Model providers are ordinary sources: the completion source exposes a
//! `chat` endpoint and the embedding source an `embeddings` endpoint, and both
//! go through the [`RequestFetcher`] like any other provider. The model name,
//! if the API needs one, lives in the source's `fixed_query_params`.
//!
//! Model output is untrusted text. [`parse_ai_json`] repairs the usual
//! defects before parsing:
//!
//! - markdown code fences around the payload
//! - control characters other than `\n`, `\r` and `\t`
//! - a JSON document encoded a second time as a JSON string

use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::error::{IntakeError, Result};
use crate::fetch::{FetchOptions, Params, RequestFetcher};
use crate::registry::SourceRegistry;

pub const CHAT_ENDPOINT: &str = "chat";
pub const EMBEDDINGS_ENDPOINT: &str = "embeddings";

/// Characters of offending output kept in [`IntakeError::MalformedAiResponse`].
const SAMPLE_CHARS: usize = 200;

/// Which sources serve model calls.
#[derive(Debug, Clone)]
pub struct AiSettings {
    pub completion_source_type: String,
    pub embedding_source_type: String,
    pub temperature: Option<f64>,
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            completion_source_type: "llm".to_string(),
            embedding_source_type: "embeddings".to_string(),
            temperature: None,
        }
    }
}

/// Issues model calls through the source registry.
pub struct AiInvoker {
    registry: Arc<SourceRegistry>,
    fetcher: Arc<RequestFetcher>,
    settings: AiSettings,
}

impl AiInvoker {
    pub fn new(
        registry: Arc<SourceRegistry>,
        fetcher: Arc<RequestFetcher>,
        settings: AiSettings,
    ) -> Self {
        Self {
            registry,
            fetcher,
            settings,
        }
    }

    /// Fill `template` from `context`, request a JSON completion and parse it.
    ///
    /// # Errors
    ///
    /// - [`IntakeError::ContentPolicy`] if the provider filtered the output.
    /// - [`IntakeError::EmptyResponse`] if there is no textual content.
    /// - [`IntakeError::MalformedAiResponse`] if the content is not JSON even
    ///   after repair.
    pub async fn completion(&self, template: &str, context: &Map<String, Value>) -> Result<Value> {
        let config = self
            .registry
            .source_config(&self.settings.completion_source_type, None)
            .await?;

        let prompt = fill_template(template, context);
        let mut params = Params::new();
        params.insert(
            "messages".to_string(),
            json!([{ "role": "user", "content": prompt }]),
        );
        params.insert(
            "response_format".to_string(),
            json!({ "type": "json_object" }),
        );
        if let Some(t) = self.settings.temperature {
            params.insert("temperature".to_string(), json!(t));
        }

        let body = self
            .fetcher
            .fetch(&config, CHAT_ENDPOINT, &params, &FetchOptions::default())
            .await?;
        let choice = body.get("choices").and_then(|c| c.get(0));

        if choice
            .and_then(|c| c.get("finish_reason"))
            .and_then(Value::as_str)
            == Some("content_filter")
        {
            tracing::warn!(source_id = %config.source_id, "completion blocked by content filter");
            return Err(IntakeError::ContentPolicy);
        }

        let content = choice
            .and_then(|c| c.pointer("/message/content"))
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .ok_or(IntakeError::EmptyResponse)?;

        parse_ai_json(content)
    }

    /// Run [`completion`](Self::completion) once per context, in order. A
    /// failure only affects its own slot.
    pub async fn batch_completions(
        &self,
        template: &str,
        contexts: &[Map<String, Value>],
    ) -> Vec<Result<Value>> {
        let mut results = Vec::with_capacity(contexts.len());
        for (i, context) in contexts.iter().enumerate() {
            let result = self.completion(template, context).await;
            if let Err(ref e) = result {
                tracing::warn!(index = i, error = %e, "completion failed");
            }
            results.push(result);
        }
        results
    }

    /// Embed all `texts` in one request. Vectors come back in input order.
    pub async fn embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let config = self
            .registry
            .source_config(&self.settings.embedding_source_type, None)
            .await?;
        let mut params = Params::new();
        params.insert("input".to_string(), json!(texts));

        let body = self
            .fetcher
            .fetch(&config, EMBEDDINGS_ENDPOINT, &params, &FetchOptions::default())
            .await?;
        let vectors = parse_embeddings(&body)?;
        if vectors.len() != texts.len() {
            return Err(IntakeError::Decode(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                vectors.len()
            )));
        }
        Ok(vectors)
    }
}

/// Extract `data[].embedding`, ordered by each entry's `index`.
fn parse_embeddings(body: &Value) -> Result<Vec<Vec<f32>>> {
    let data = body
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| IntakeError::Decode("embedding response: missing data array".into()))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, entry) in data.iter().enumerate() {
        let vector = entry
            .get("embedding")
            .and_then(Value::as_array)
            .ok_or_else(|| IntakeError::Decode("embedding response: missing embedding".into()))?
            .iter()
            .map(|v| {
                v.as_f64().map(|f| f as f32).ok_or_else(|| {
                    IntakeError::Decode(format!(
                        "embedding response: non-numeric component {} at entry {}",
                        v, position
                    ))
                })
            })
            .collect::<Result<Vec<f32>>>()?;
        let index = entry
            .get("index")
            .and_then(Value::as_u64)
            .map(|i| i as usize)
            .unwrap_or(position);
        indexed.push((index, vector));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

/// Replace `{key}` with the context value. String values are inserted as-is,
/// other values as JSON text. Unknown placeholders stay verbatim.
pub fn fill_template(template: &str, context: &Map<String, Value>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        match context.get(&after[..end]) {
            Some(Value::String(s)) => {
                out.push_str(s);
                rest = &after[end + 1..];
            }
            Some(other) => {
                out.push_str(&other.to_string());
                rest = &after[end + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Parse model output as JSON after stripping fences and control characters.
/// A JSON string result is parsed a second time.
pub fn parse_ai_json(raw: &str) -> Result<Value> {
    let cleaned = clean_model_text(raw);
    let malformed = |reason: String| IntakeError::MalformedAiResponse {
        reason,
        sample: cleaned.chars().take(SAMPLE_CHARS).collect(),
    };

    match serde_json::from_str::<Value>(&cleaned) {
        Ok(Value::String(inner)) => serde_json::from_str(&clean_model_text(&inner))
            .map_err(|e| malformed(format!("double-encoded payload: {}", e))),
        Ok(value) => Ok(value),
        Err(e) => Err(malformed(e.to_string())),
    }
}

fn clean_model_text(raw: &str) -> String {
    let mut text = raw.trim();
    if text.starts_with("```") {
        // Drop the opening fence line, including any language tag.
        text = text.split_once('\n').map(|(_, rest)| rest).unwrap_or("");
        text = text.trim_end();
        text = text.strip_suffix("```").unwrap_or(text);
    }
    text.chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t'))
        .collect::<String>()
        .trim()
        .to_string()
}
