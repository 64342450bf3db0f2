use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use intake_harness::fetch::{fetch_external_data, FetchOptions, Params, RequestFetcher};
use intake_harness::mapping::map_items;
use intake_harness::models::SourceConfig;
use intake_harness::registry::{SourceRegistry, StaticCatalog};
use intake_harness::secrets::StaticSecrets;
use intake_harness::IntakeError;
use serde_json::{json, Value};
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn source(server: &MockServer, extra: Value) -> SourceConfig {
    let mut base = json!({
        "source_id": "hn",
        "name": "Hacker News",
        "source_type": "news",
        "base_url": format!("{}/api/v1", server.uri()),
        "endpoint_paths": {"search": "/search", "quote": "/quote/{symbol}"},
        "is_active": true
    });
    if let (Value::Object(b), Value::Object(e)) = (&mut base, extra) {
        b.extend(e);
    }
    serde_json::from_value(base).unwrap()
}

fn params(pairs: &[(&str, &str)]) -> Params {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), json!(v)))
        .collect()
}

fn fetcher() -> RequestFetcher {
    RequestFetcher::new(std::time::Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn get_request_carries_fixed_renamed_and_auth_params() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/search"))
        .and(query_param("tags", "story"))
        .and(query_param("query", "AI"))
        .and(header("x-api-key", "k-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "hits": [
                {"title": "AI wins", "url": "https://a.example", "points": 10},
                {"title": "Rust 2.0", "url": "https://b.example", "points": 3}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut cfg = source(
        &server,
        json!({
            "auth_method": "header_key",
            "fixed_query_params": {"tags": "story"},
            "dynamic_param_names": {"q": "query"},
            "response_mapping_rules": {
                "items_path": "hits",
                "fields": {"title": "title", "link": "url"}
            }
        }),
    );
    cfg.api_key = Some("k-123".into());

    let body = fetcher()
        .fetch(&cfg, "search", &params(&[("q", "AI")]), &FetchOptions::default())
        .await
        .unwrap();
    let items = map_items(&body, &cfg.response_mapping_rules);
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["title"], "AI wins");
    assert_eq!(items[1]["link"], "https://b.example");
}

#[tokio::test]
async fn created_filter_uses_the_lookback_window() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": []})))
        .mount(&server)
        .await;

    let cfg = source(
        &server,
        json!({
            "time_filter_param_name": "created",
            "default_lookback_days": 7
        }),
    );

    let before = (Utc::now() - Duration::days(7)).format("%Y-%m-%d").to_string();
    fetcher()
        .fetch(&cfg, "search", &params(&[("q", "rust")]), &FetchOptions::default())
        .await
        .unwrap();
    let after = (Utc::now() - Duration::days(7)).format("%Y-%m-%d").to_string();

    let requests = server.received_requests().await.unwrap();
    let q: String = requests[0]
        .url
        .query_pairs()
        .find(|(k, _)| k == "q")
        .map(|(_, v)| v.into_owned())
        .unwrap();
    assert!(
        q == format!("rust created:>{}", before) || q == format!("rust created:>{}", after),
        "unexpected q: {q}"
    );
}

#[tokio::test]
async fn non_success_status_is_an_external_api_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/search"))
        .respond_with(ResponseTemplate::new(429).set_body_string("x".repeat(5000)))
        .mount(&server)
        .await;

    let cfg = source(&server, json!({}));
    let err = fetcher()
        .fetch(&cfg, "search", &Params::new(), &FetchOptions::default())
        .await
        .unwrap_err();
    match err {
        IntakeError::ExternalApi {
            provider,
            status,
            body,
        } => {
            assert_eq!(provider, "Hacker News");
            assert_eq!(status, 429);
            assert!(body.len() < 5000);
            assert!(body.starts_with("xxxx"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn xml_bodies_are_passed_through_as_text() {
    let server = MockServer::start().await;
    let feed = "<feed><entry><title>Paper</title></entry></feed>";
    Mock::given(method("GET"))
        .and(path("/api/v1/search"))
        .respond_with(ResponseTemplate::new(200).set_body_string(feed))
        .mount(&server)
        .await;

    let cfg = source(&server, json!({"response_type": "xml"}));
    let body = fetcher()
        .fetch(&cfg, "search", &Params::new(), &FetchOptions::default())
        .await
        .unwrap();
    assert_eq!(body, Value::String(feed.to_string()));
}

#[tokio::test]
async fn invalid_json_is_a_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/search"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let cfg = source(&server, json!({}));
    let err = fetcher()
        .fetch(&cfg, "search", &Params::new(), &FetchOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, IntakeError::Decode(_)), "got {err:?}");
}

#[tokio::test]
async fn post_json_sends_params_in_the_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/search"))
        .and(header("authorization", "Bearer sk-9"))
        .and(body_json(json!({"query": "graphene", "limit": 25})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [{"id": 1}]})))
        .expect(1)
        .mount(&server)
        .await;

    let mut cfg = source(
        &server,
        json!({
            "request_method": "POST",
            "payload_type": "json",
            "auth_method": "bearer_token",
            "dynamic_param_names": {"q": "query"},
            "pagination_param_names": {"page_size": "limit"}
        }),
    );
    cfg.api_key = Some("sk-9".into());

    let mut p = params(&[("q", "graphene")]);
    p.insert("page_size".into(), json!(25));
    let body = fetcher()
        .fetch(&cfg, "search", &p, &FetchOptions::default())
        .await
        .unwrap();
    assert_eq!(body["data"][0]["id"], 1);
}

#[tokio::test]
async fn path_placeholders_are_filled_and_consumed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/quote/NVDA"))
        .and(query_param("apiKey", "q-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"price": 1.5})))
        .expect(1)
        .mount(&server)
        .await;

    let mut cfg = source(&server, json!({"auth_method": "query_param_key"}));
    cfg.api_key = Some("q-key".into());

    let body = fetcher()
        .fetch(&cfg, "quote", &params(&[("symbol", "NVDA")]), &FetchOptions::default())
        .await
        .unwrap();
    assert_eq!(body["price"], 1.5);

    let requests = server.received_requests().await.unwrap();
    assert!(requests[0].url.query_pairs().all(|(k, _)| k != "symbol"));
}

#[tokio::test]
async fn missing_placeholder_value_is_an_invalid_endpoint() {
    let server = MockServer::start().await;
    let cfg = source(&server, json!({}));
    let err = fetcher()
        .fetch(&cfg, "quote", &Params::new(), &FetchOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, IntakeError::InvalidEndpoint { .. }), "got {err:?}");
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn fetch_external_data_resolves_through_the_registry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/search"))
        .and(header("x-api-key", "from-secrets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    let keyed = source(
        &server,
        json!({"auth_method": "header_key", "api_key_name": "HN_KEY"}),
    );
    let unkeyed = source(
        &server,
        json!({
            "source_id": "gnews",
            "auth_method": "header_key",
            "api_key_name": "GNEWS_KEY"
        }),
    );

    let secrets = StaticSecrets::new(HashMap::from([(
        "HN_KEY".to_string(),
        "from-secrets".to_string(),
    )]));
    let registry = SourceRegistry::new(
        Arc::new(StaticCatalog::new(vec![keyed, unkeyed])),
        Arc::new(secrets),
    );
    let fetcher = fetcher();

    let body = fetch_external_data(
        &registry,
        &fetcher,
        "news",
        Some("hn"),
        "search",
        &Params::new(),
        &FetchOptions::default(),
    )
    .await
    .unwrap();
    assert_eq!(body["ok"], true);

    let err = fetch_external_data(
        &registry,
        &fetcher,
        "news",
        Some("gnews"),
        "search",
        &Params::new(),
        &FetchOptions::default(),
    )
    .await
    .unwrap_err();
    match err {
        IntakeError::MissingCredential { source_id, key_name } => {
            assert_eq!(source_id, "gnews");
            assert_eq!(key_name, "GNEWS_KEY");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}
