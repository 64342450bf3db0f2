//! Configuration-driven HTTP requests to external providers.
//!
//! [`RequestFetcher::fetch`] turns a resolved [`SourceConfig`], an endpoint
//! key and a set of generic parameters into one HTTP call:
//!
//! 1. Resolve the endpoint path template and fill its `{placeholder}`
//!    segments from the parameters.
//! 2. Merge fixed parameters, caller parameters and a synthesized time
//!    filter.
//! 3. Rename generic keys to the provider's names.
//! 4. Place parameters in the query string (GET) or the body.
//! 5. Inject the API key.
//! 6. Decode the response per `response_type`.
//!
//! Steps 1–5 are pure and exposed as [`prepare_request`].
//!
//! # Time filter dialects
//!
//! | `time_filter_param_name` | Effect                                     |
//! |--------------------------|--------------------------------------------|
//! | `key=prefix`             | `key = prefix + unix_seconds(cutoff)`      |
//! | `created`                | append `created:>YYYY-MM-DD` to `q`        |
//! | anything else            | `name = YYYY-MM-DD`                        |

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Method;
use serde_json::Value;

use crate::error::{truncate_body, IntakeError, Result};
use crate::models::{AuthMethod, HttpMethod, PayloadType, ResponseType, SourceConfig};
use crate::registry::SourceRegistry;
use crate::store::uri_encode;

pub const DEFAULT_API_KEY_HEADER: &str = "X-Api-Key";
pub const DEFAULT_API_KEY_QUERY_PARAM: &str = "apiKey";

/// Generic request parameters, keyed by generic name.
pub type Params = BTreeMap<String, Value>;

/// Per-call overrides.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Reference instant for the time filter. Defaults to the current time.
    pub now: Option<DateTime<Utc>>,
    /// Overrides the source's `default_lookback_days`.
    pub lookback_days: Option<u32>,
    /// Extra request headers.
    pub headers: Vec<(String, String)>,
    /// Overrides the client-wide timeout.
    pub timeout: Option<Duration>,
}

/// Body of a non-GET request.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    Json(Value),
    Form(Vec<(String, String)>),
}

/// A fully built request, before it is sent.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
    pub headers: Vec<(String, String)>,
}

impl PreparedRequest {
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Names of the `{placeholder}` segments of a path template, in order.
pub fn placeholders(template: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        let Some(len) = rest[start..].find('}') else {
            break;
        };
        let name = &rest[start + 1..start + len];
        if !name.is_empty() {
            names.push(name.to_string());
        }
        rest = &rest[start + len + 1..];
    }
    names
}

fn method_of(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
    }
}

fn param_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Build the request for one call without sending it.
pub fn prepare_request(
    config: &SourceConfig,
    endpoint_key: &str,
    params: &Params,
    options: &FetchOptions,
) -> Result<PreparedRequest> {
    let invalid = |reason: String| IntakeError::InvalidEndpoint {
        source_id: config.source_id.clone(),
        endpoint: endpoint_key.to_string(),
        reason,
    };

    let template = config
        .endpoint_paths
        .get(endpoint_key)
        .ok_or_else(|| invalid("unknown endpoint key".to_string()))?;

    let mut merged: Params = config.fixed_query_params.clone();
    for (k, v) in params {
        merged.insert(k.clone(), v.clone());
    }
    apply_time_filter(config, &mut merged, options);

    let mut path = template.clone();
    for name in placeholders(template) {
        let value = merged
            .remove(&name)
            .as_ref()
            .and_then(param_text)
            .ok_or_else(|| invalid(format!("no value for placeholder '{{{}}}'", name)))?;
        path = path.replace(&format!("{{{}}}", name), &uri_encode(&value));
    }

    // A renamed param wins over an unrenamed one with the same wire name.
    let mut wire = Params::new();
    let mut mapped = Vec::new();
    for (k, v) in merged {
        match config
            .dynamic_param_names
            .get(&k)
            .or_else(|| config.pagination_param_names.get(&k))
        {
            Some(key) => mapped.push((key.clone(), v)),
            None => {
                wire.insert(k, v);
            }
        }
    }
    wire.extend(mapped);
    let renamed: Vec<(String, Value)> = wire.into_iter().collect();

    let url = if path.trim_matches('/').is_empty() {
        config.base_url.trim_end_matches('/').to_string()
    } else {
        format!(
            "{}/{}",
            config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    };

    let method = method_of(config.request_method);
    let as_pairs = |pairs: &[(String, Value)]| -> Vec<(String, String)> {
        pairs
            .iter()
            .filter_map(|(k, v)| param_text(v).map(|t| (k.clone(), t)))
            .collect()
    };

    let (mut query, body) = if method == Method::GET {
        (as_pairs(&renamed), RequestBody::Empty)
    } else {
        match config.payload_type {
            PayloadType::Json => (
                Vec::new(),
                RequestBody::Json(Value::Object(renamed.into_iter().collect())),
            ),
            PayloadType::Form => (Vec::new(), RequestBody::Form(as_pairs(&renamed))),
            PayloadType::None => (as_pairs(&renamed), RequestBody::Empty),
        }
    };

    let mut headers = Vec::new();
    if config.auth_method != AuthMethod::None {
        let key = config
            .api_key
            .clone()
            .ok_or_else(|| IntakeError::MissingCredential {
                source_id: config.source_id.clone(),
                key_name: config
                    .api_key_name
                    .clone()
                    .unwrap_or_else(|| "api_key".to_string()),
            })?;
        match config.auth_method {
            AuthMethod::HeaderKey => headers.push((
                config
                    .api_key_header_name
                    .clone()
                    .unwrap_or_else(|| DEFAULT_API_KEY_HEADER.to_string()),
                key,
            )),
            AuthMethod::BearerToken => {
                headers.push(("Authorization".to_string(), format!("Bearer {}", key)))
            }
            AuthMethod::QueryParamKey => query.push((
                config
                    .api_key_query_param_name
                    .clone()
                    .unwrap_or_else(|| DEFAULT_API_KEY_QUERY_PARAM.to_string()),
                key,
            )),
            AuthMethod::None => {}
        }
    }
    headers.extend(options.headers.iter().cloned());

    Ok(PreparedRequest {
        method,
        url,
        query,
        body,
        headers,
    })
}

/// Add the time filter to `params` unless the caller already supplied it.
fn apply_time_filter(config: &SourceConfig, params: &mut Params, options: &FetchOptions) {
    let Some(name) = config
        .time_filter_param_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
    else {
        return;
    };
    let Some(days) = options.lookback_days.or(config.default_lookback_days) else {
        return;
    };

    let now = options.now.unwrap_or_else(Utc::now);
    let cutoff = now - chrono::Duration::days(i64::from(days));
    let date = cutoff.format("%Y-%m-%d").to_string();

    if let Some((key, prefix)) = name.split_once('=') {
        params
            .entry(key.to_string())
            .or_insert_with(|| Value::String(format!("{}{}", prefix, cutoff.timestamp())));
    } else if name == "created" {
        let existing = params.get("q").and_then(param_text).unwrap_or_default();
        if existing.contains("created:") {
            return;
        }
        let clause = format!("created:>{}", date);
        let q = if existing.trim().is_empty() {
            clause
        } else {
            format!("{} {}", existing, clause)
        };
        params.insert("q".to_string(), Value::String(q));
    } else {
        params
            .entry(name.to_string())
            .or_insert_with(|| Value::String(date));
    }
}

/// Executes prepared requests against external providers.
pub struct RequestFetcher {
    client: reqwest::Client,
}

impl RequestFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// Build and execute one call, returning the decoded body.
    ///
    /// `json` responses are parsed (an empty body is `null`); `xml` and
    /// `text` responses are returned as a JSON string.
    pub async fn fetch(
        &self,
        config: &SourceConfig,
        endpoint_key: &str,
        params: &Params,
        options: &FetchOptions,
    ) -> Result<Value> {
        let prepared = prepare_request(config, endpoint_key, params, options)?;
        tracing::debug!(
            source_id = %config.source_id,
            endpoint = endpoint_key,
            method = %prepared.method,
            url = %prepared.url,
            "fetching"
        );

        let mut builder = self
            .client
            .request(prepared.method.clone(), &prepared.url)
            .query(&prepared.query);
        builder = match &prepared.body {
            RequestBody::Empty => builder,
            RequestBody::Json(body) => builder.json(body),
            RequestBody::Form(pairs) => builder.form(pairs),
        };
        for (name, value) in &prepared.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }

        let resp = builder.send().await?;
        let status = resp.status();
        let text = resp.text().await?;

        if !status.is_success() {
            tracing::warn!(
                source_id = %config.source_id,
                endpoint = endpoint_key,
                status = status.as_u16(),
                "provider returned an error"
            );
            return Err(IntakeError::ExternalApi {
                provider: config.display_name().to_string(),
                status: status.as_u16(),
                body: truncate_body(&text, 1000),
            });
        }

        match config.response_type {
            ResponseType::Json if text.trim().is_empty() => Ok(Value::Null),
            ResponseType::Json => serde_json::from_str(&text).map_err(|e| {
                IntakeError::Decode(format!(
                    "{} returned invalid JSON: {}",
                    config.display_name(),
                    e
                ))
            }),
            ResponseType::Xml | ResponseType::Text => Ok(Value::String(text)),
        }
    }
}

/// Resolve the source for `source_type` (optionally a specific id) and fetch
/// one endpoint from it.
pub async fn fetch_external_data(
    registry: &SourceRegistry,
    fetcher: &RequestFetcher,
    source_type: &str,
    source_id: Option<&str>,
    endpoint_key: &str,
    params: &Params,
    options: &FetchOptions,
) -> Result<Value> {
    let config = registry.source_config(source_type, source_id).await?;
    fetcher.fetch(&config, endpoint_key, params, options).await
}
