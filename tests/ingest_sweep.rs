use std::collections::HashMap;
use std::sync::Arc;

use intake_harness::auth::StaticToken;
use intake_harness::fetch::{FetchOptions, RequestFetcher};
use intake_harness::ingest::{load_monitored_entities, ErrorPolicy, IngestSweep, SweepSettings};
use intake_harness::models::{MonitoredEntity, SourceConfig, TASK_STATUS_PENDING};
use intake_harness::registry::{SourceRegistry, StaticCatalog};
use intake_harness::secrets::StaticSecrets;
use intake_harness::store::{DocumentStore, StoreSettings};
use intake_harness::IntakeError;
use serde_json::{json, Value};
use wiremock::matchers::{method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const DOCS: &str = "/v1/projects/demo/databases/(default)/documents";

fn source(server: &MockServer, extra: Value) -> SourceConfig {
    let mut base = json!({
        "source_id": "wire",
        "source_type": "news",
        "base_url": format!("{}/provider", server.uri()),
        "endpoint_paths": {"search": "/search"},
        "dynamic_param_names": {"q": "query"},
        "response_mapping_rules": {
            "items_path": "articles",
            "fields": {"title": "title", "summary": "description", "url": "url"}
        },
        "is_active": true
    });
    if let (Value::Object(b), Value::Object(e)) = (&mut base, extra) {
        b.extend(e);
    }
    serde_json::from_value(base).unwrap()
}

fn entity(id: &str, keywords: &[&str]) -> MonitoredEntity {
    MonitoredEntity {
        entity_id: id.into(),
        entity_type: "organization".into(),
        name: id.into(),
        aliases: vec![],
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
        monitoring_status: "active".into(),
    }
}

fn sweep(sources: Vec<SourceConfig>) -> IngestSweep {
    let registry = SourceRegistry::new(
        Arc::new(StaticCatalog::new(sources)),
        Arc::new(StaticSecrets::new(HashMap::new())),
    );
    IngestSweep::new(
        Arc::new(registry),
        Arc::new(RequestFetcher::new(std::time::Duration::from_secs(5)).unwrap()),
        SweepSettings {
            endpoint_key: "search".into(),
            task_type: "ANALYZE_ITEM".into(),
            tasks_collection: "queued_tasks".into(),
            page_size: Some(50),
            fetch: FetchOptions::default(),
        },
    )
}

fn types(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn articles(items: &[(&str, &str)]) -> ResponseTemplate {
    let articles: Vec<Value> = items
        .iter()
        .map(|(title, url)| json!({"title": title, "description": "", "url": url}))
        .collect();
    ResponseTemplate::new(200).set_body_json(json!({"articles": articles}))
}

#[tokio::test]
async fn every_source_gets_one_request_per_chunk() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/provider/search"))
        .respond_with(articles(&[]))
        .expect(3)
        .mount(&server)
        .await;

    let keywords: Vec<String> = (0..12).map(|i| format!("kw{i}")).collect();
    let kw_refs: Vec<&str> = keywords.iter().map(String::as_str).collect();
    let entities = vec![entity("A", &kw_refs)];

    let cfg = source(&server, json!({"query_chunk_size": 5}));
    let mut policy = ErrorPolicy::continue_on_error();
    let output = sweep(vec![cfg])
        .collect(&types(&["news"]), &entities, &mut policy)
        .await
        .unwrap();

    assert_eq!(output.report.sources_queried, 1);
    assert_eq!(output.report.chunks_issued, 3);
    assert_eq!(policy.errors(), 0);

    let requests = server.received_requests().await.unwrap();
    let first_query: String = requests[0]
        .url
        .query_pairs()
        .find(|(k, _)| k == "query")
        .map(|(_, v)| v.into_owned())
        .unwrap();
    assert_eq!(first_query, r#""kw0" OR "kw1" OR "kw2" OR "kw3" OR "kw4""#);
    // page_size is not mapped by this source.
    assert!(requests[0].url.query_pairs().all(|(k, _)| k != "page_size"));
}

#[tokio::test]
async fn items_are_attributed_by_keyword_and_unmatched_ones_dropped() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/provider/search"))
        .respond_with(articles(&[
            ("OpenAI ships a new model", "https://n.example/1"),
            ("Weather is mild today", "https://n.example/2"),
            ("Nvidia and OpenAI sign deal", "https://n.example/3"),
        ]))
        .mount(&server)
        .await;

    let entities = vec![entity("A", &["nvidia"]), entity("B", &["OpenAI"])];
    let mut policy = ErrorPolicy::continue_on_error();
    let output = sweep(vec![source(&server, json!({}))])
        .collect(&types(&["news"]), &entities, &mut policy)
        .await
        .unwrap();

    assert_eq!(output.report.items_fetched, 3);
    assert_eq!(output.report.items_dropped, 1);
    assert_eq!(output.tasks.len(), 2);

    let first = &output.tasks[0];
    assert_eq!(first.trigger_entity_id(), Some("B"));
    assert_eq!(first.linked_entity_ids(), vec!["B"]);
    assert_eq!(first.task_status, TASK_STATUS_PENDING);
    assert_eq!(first.source_id, "wire");
    assert_eq!(first.payload["title"], "OpenAI ships a new model");

    let second = &output.tasks[1];
    assert_eq!(second.trigger_entity_id(), Some("A"));
    assert_eq!(second.linked_entity_ids(), vec!["A", "B"]);
}

#[tokio::test]
async fn failed_chunk_is_counted_and_the_sweep_continues() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/provider/search"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/provider/search"))
        .respond_with(articles(&[("beta release notes", "https://n.example/b")]))
        .with_priority(5)
        .mount(&server)
        .await;

    let entities = vec![entity("A", &["alpha"]), entity("B", &["beta"])];
    let cfg = source(&server, json!({"query_chunk_size": 1}));
    let mut policy = ErrorPolicy::continue_on_error();
    let output = sweep(vec![cfg])
        .collect(&types(&["news"]), &entities, &mut policy)
        .await
        .unwrap();

    assert_eq!(output.report.chunks_issued, 2);
    assert_eq!(output.report.chunks_failed, 1);
    assert_eq!(policy.errors(), 1);
    assert_eq!(output.tasks.len(), 1);
    assert_eq!(output.tasks[0].trigger_entity_id(), Some("B"));
}

#[tokio::test]
async fn identifier_endpoints_take_one_keyword_per_call() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/provider/quote/[a-z]+$"))
        .respond_with(articles(&[]))
        .expect(2)
        .mount(&server)
        .await;

    let single = source(
        &server,
        json!({
            "source_id": "ticker",
            "endpoint_paths": {"search": "/quote/{symbol}"},
            "query_chunk_size": 1
        }),
    );
    let chunked = source(
        &server,
        json!({
            "source_id": "bulk",
            "endpoint_paths": {"search": "/quote/{symbol}"},
            "query_chunk_size": 5
        }),
    );

    let entities = vec![entity("A", &["nvda", "amd"])];
    let mut policy = ErrorPolicy::continue_on_error();
    let output = sweep(vec![single, chunked])
        .collect(&types(&["news"]), &entities, &mut policy)
        .await
        .unwrap();

    assert_eq!(output.report.sources_queried, 1);
    assert_eq!(output.report.skipped_sources, 1);
    assert_eq!(output.report.chunks_issued, 2);

    let paths: Vec<String> = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|r| r.url.path().to_string())
        .collect();
    assert_eq!(paths, vec!["/provider/quote/nvda", "/provider/quote/amd"]);
}

#[tokio::test]
async fn identifier_placeholders_keep_the_keyword_case() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/provider/quote/NVDA"))
        .respond_with(articles(&[("NVDA closes higher", "https://q.example/nvda")]))
        .expect(1)
        .mount(&server)
        .await;

    let ticker = source(
        &server,
        json!({
            "source_id": "ticker",
            "endpoint_paths": {"search": "/quote/{symbol}"},
            "query_chunk_size": 1
        }),
    );
    let mut policy = ErrorPolicy::continue_on_error();
    let output = sweep(vec![ticker])
        .collect(&types(&["news"]), &[entity("A", &["NVDA"])], &mut policy)
        .await
        .unwrap();

    assert_eq!(policy.errors(), 0);
    assert_eq!(output.tasks.len(), 1);
    assert_eq!(output.tasks[0].trigger_entity_id(), Some("A"));
}

#[tokio::test]
async fn page_size_is_sent_to_sources_that_map_it() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/provider/search"))
        .and(query_param("pageSize", "50"))
        .respond_with(articles(&[]))
        .expect(1)
        .mount(&server)
        .await;

    let cfg = source(
        &server,
        json!({"pagination_param_names": {"page_size": "pageSize"}}),
    );
    let mut policy = ErrorPolicy::continue_on_error();
    sweep(vec![cfg])
        .collect(&types(&["news"]), &[entity("A", &["x"])], &mut policy)
        .await
        .unwrap();
}

#[tokio::test]
async fn unknown_source_type_aborts_the_sweep_by_default() {
    let entities = vec![entity("A", &["x"])];

    let mut policy = ErrorPolicy::default();
    let err = sweep(vec![])
        .collect(&types(&["papers"]), &entities, &mut policy)
        .await
        .unwrap_err();
    assert!(matches!(err, IntakeError::ConfigNotFound { .. }), "got {err:?}");
    assert_eq!(policy.errors(), 1);
}

#[tokio::test]
async fn source_without_the_sweep_endpoint_aborts_the_sweep() {
    let server = MockServer::start().await;
    let cfg = source(&server, json!({"endpoint_paths": {"latest": "/latest"}}));

    let mut policy = ErrorPolicy::continue_on_error();
    let err = sweep(vec![cfg])
        .collect(&types(&["news"]), &[entity("A", &["x"])], &mut policy)
        .await
        .unwrap_err();
    assert!(matches!(err, IntakeError::InvalidEndpoint { .. }), "got {err:?}");
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn chunk_failures_are_counted_unless_failing_fast() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/provider/search"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let entities = vec![entity("A", &["x"])];

    let mut policy = ErrorPolicy::continue_on_error();
    let output = sweep(vec![source(&server, json!({}))])
        .collect(&types(&["news"]), &entities, &mut policy)
        .await
        .unwrap();
    assert_eq!(output.report.chunks_failed, 1);
    assert_eq!(policy.errors(), 1);

    let mut policy = ErrorPolicy::fail_fast();
    let err = sweep(vec![source(&server, json!({}))])
        .collect(&types(&["news"]), &entities, &mut policy)
        .await
        .unwrap_err();
    assert!(matches!(err, IntakeError::ExternalApi { status: 500, .. }), "got {err:?}");
    assert_eq!(policy.errors(), 1);
}

#[tokio::test]
async fn sources_without_their_secret_are_left_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/provider/search"))
        .respond_with(articles(&[]))
        .expect(1)
        .mount(&server)
        .await;

    let open = source(&server, json!({"source_id": "open"}));
    let keyed = source(
        &server,
        json!({
            "source_id": "keyed",
            "auth_method": "header_key",
            "api_key_name": "KEYED_API_KEY"
        }),
    );
    let mut policy = ErrorPolicy::continue_on_error();
    let output = sweep(vec![open, keyed])
        .collect(&types(&["news"]), &[entity("A", &["x"])], &mut policy)
        .await
        .unwrap();
    assert_eq!(output.report.sources_queried, 1);
}

#[tokio::test]
async fn run_upserts_pending_tasks() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/provider/search"))
        .respond_with(articles(&[
            ("Rust 2.0 announced", "https://n.example/rust"),
            ("Rust 2.0 announced", "https://n.example/rust"),
        ]))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{}:commit", DOCS)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"writeResults": []})))
        .expect(1)
        .mount(&server)
        .await;

    let settings = StoreSettings::new("demo").with_api_base(format!("{}/v1", server.uri()));
    let store = DocumentStore::new(settings, Arc::new(StaticToken::new("t"))).unwrap();

    let mut policy = ErrorPolicy::continue_on_error();
    let report = sweep(vec![source(&server, json!({}))])
        .run(&store, &types(&["news"]), &[entity("lang", &["rust"])], &mut policy)
        .await
        .unwrap();
    assert_eq!(report.duplicates, 1);
    assert_eq!(report.tasks_built, 1);
    assert_eq!(report.write.written, 1);

    let commit = server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .find(|r| r.url.path().ends_with(":commit"))
        .unwrap();
    let body: Value = commit.body_json().unwrap();
    let write = &body["writes"][0];
    assert!(write["update"]["name"]
        .as_str()
        .unwrap()
        .starts_with("projects/demo/databases/(default)/documents/queued_tasks/"));
    let fields = &write["update"]["fields"];
    assert_eq!(fields["task_status"], json!({"stringValue": "PENDING"}));
    assert_eq!(fields["task_type"], json!({"stringValue": "ANALYZE_ITEM"}));
    assert_eq!(fields["retry_count"], json!({"integerValue": "0"}));
    assert_eq!(
        fields["payload"]["mapValue"]["fields"]["trigger_entity_id"],
        json!({"stringValue": "lang"})
    );
}

#[tokio::test]
async fn load_monitored_entities_keeps_active_ones() {
    let server = MockServer::start().await;
    let doc = |id: &str, fields: Value| {
        json!({
            "name": format!("projects/demo/databases/(default)/documents/monitored_entities/{}", id),
            "fields": fields
        })
    };
    Mock::given(method("GET"))
        .and(path(format!("{}/monitored_entities", DOCS)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "documents": [
                doc("e1", json!({
                    "name": {"stringValue": "Nvidia"},
                    "monitoring_status": {"stringValue": "active"}
                })),
                doc("e2", json!({
                    "name": {"stringValue": "Old Corp"},
                    "monitoring_status": {"stringValue": "paused"}
                })),
                doc("e3", json!({
                    "entity_id": {"stringValue": "ent-3"},
                    "name": {"stringValue": "OpenAI"},
                    "keywords": {"arrayValue": {"values": [{"stringValue": "GPT"}]}}
                }))
            ]
        })))
        .mount(&server)
        .await;

    let settings = StoreSettings::new("demo").with_api_base(format!("{}/v1", server.uri()));
    let store = DocumentStore::new(settings, Arc::new(StaticToken::new("t"))).unwrap();
    let entities = load_monitored_entities(&store, "monitored_entities", 100)
        .await
        .unwrap();

    let ids: Vec<&str> = entities.iter().map(|e| e.entity_id.as_str()).collect();
    assert_eq!(ids, vec!["e1", "ent-3"]);
    assert_eq!(entities[1].search_keywords(), vec!["GPT"]);
}
