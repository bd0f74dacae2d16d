//! CLI Request Tests
//!
//! Drives the explain and query commands through their request handlers
//! with a configuration file and dataset on disk.

use std::io::Write;
use std::sync::Arc;

use serde_json::json;
use tempfile::{NamedTempFile, TempDir};

use kvquery::cli::{execute_request, explain_request, QueryRequest};
use kvquery::config::Config;
use kvquery::datastore::MemoryDatastore;
use kvquery::observability::MetricsRegistry;

// =============================================================================
// Helper Functions
// =============================================================================

struct Fixture {
    _dir: TempDir,
    config: Config,
}

fn fixture(query_section: serde_json::Value) -> Fixture {
    let dir = TempDir::new().unwrap();
    let dataset = dir.path().join("books.json");
    std::fs::write(
        &dataset,
        json!([
            {"key": {"kind": "Book", "id": 1}, "properties": {"title": "Dune", "year": 1965}},
            {"key": {"kind": "Book", "id": 2}, "properties": {"title": "Emma", "year": 1815}},
            {"key": {"kind": "Book", "id": 3}, "properties": {"title": "Ulysses", "year": 1922}}
        ])
        .to_string(),
    )
    .unwrap();

    let mut file = NamedTempFile::new_in(dir.path()).unwrap();
    let config = json!({
        "kinds": {"Book": {"id_property": "id"}},
        "query": query_section,
        "dataset": dataset,
        "log_level": "error"
    });
    file.write_all(config.to_string().as_bytes()).unwrap();

    let config = Config::load(file.path()).unwrap();
    Fixture { _dir: dir, config }
}

fn request(value: serde_json::Value) -> QueryRequest {
    serde_json::from_value(value).unwrap()
}

fn store(config: &Config) -> MemoryDatastore {
    MemoryDatastore::from_records(config.load_dataset().unwrap())
}

// =============================================================================
// Explain Tests
// =============================================================================

#[test]
fn test_explain_serializes_plan() {
    let fx = fixture(json!({}));
    let metrics = MetricsRegistry::new();
    let req = request(json!({"kind": "Book", "filter": "year > :y", "order": "year", "params": {"y": 1900}}));

    let explained = explain_request(&fx.config, &req, &metrics).unwrap();
    let value = serde_json::to_value(&explained).unwrap();
    assert_eq!(value["accepted"], true);
    assert_eq!(value["strategy"], "SINGLE_NATIVE_QUERY");
    assert!(value.get("rejection_code").is_none());
}

#[test]
fn test_explain_rejection_is_output() {
    let fx = fixture(json!({}));
    let metrics = MetricsRegistry::new();
    let req = request(json!({"kind": "Book", "filter": "title == 'a' || year == 1"}));

    let explained = explain_request(&fx.config, &req, &metrics).unwrap();
    assert!(!explained.accepted);
    assert_eq!(explained.rejection_code.as_deref(), Some("QUERY_UNSUPPORTED_OPERATOR"));
    assert_eq!(metrics.snapshot().queries_rejected, 1);
}

#[test]
fn test_unknown_kind_is_rejected() {
    let fx = fixture(json!({}));
    let metrics = MetricsRegistry::new();
    let explained = explain_request(&fx.config, &request(json!({"kind": "Movie"})), &metrics).unwrap();
    assert_eq!(explained.rejection_code.as_deref(), Some("QUERY_UNKNOWN_KIND"));
}

// =============================================================================
// Query Tests
// =============================================================================

#[test]
fn test_query_pages_with_cursor() {
    let fx = fixture(json!({}));
    let store = store(&fx.config);
    let metrics = Arc::new(MetricsRegistry::new());

    let first = execute_request(
        &fx.config,
        &store,
        &request(json!({"kind": "Book", "order": "year", "limit": 2})),
        &metrics,
    )
    .unwrap();
    let titles: Vec<&str> = first["records"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["properties"]["title"].as_str().unwrap())
        .collect();
    assert_eq!(titles, vec!["Emma", "Ulysses"]);

    let cursor = first["cursor"].as_str().unwrap();
    let second = execute_request(
        &fx.config,
        &store,
        &request(json!({"kind": "Book", "order": "year", "limit": 2, "cursor": cursor})),
        &metrics,
    )
    .unwrap();
    assert_eq!(second["records"][0]["properties"]["title"], "Dune");
    assert_eq!(second["records"].as_array().unwrap().len(), 1);
}

#[test]
fn test_query_uses_configured_fallback() {
    let fx = fixture(json!({"allow_in_memory_filter": true}));
    let store = store(&fx.config);
    let metrics = Arc::new(MetricsRegistry::new());

    let response = execute_request(
        &fx.config,
        &store,
        &request(json!({"kind": "Book", "filter": "title == 'Emma' || year == 1965", "keys_only": true})),
        &metrics,
    )
    .unwrap();
    assert_eq!(
        response["records"],
        json!([
            {"key": {"kind": "Book", "id": 1}, "properties": {}},
            {"key": {"kind": "Book", "id": 2}, "properties": {}}
        ])
    );
    assert_eq!(metrics.snapshot().in_memory_fallbacks, 1);
}

#[test]
fn test_query_count() {
    let fx = fixture(json!({}));
    let store = store(&fx.config);
    let metrics = Arc::new(MetricsRegistry::new());

    let response = execute_request(
        &fx.config,
        &store,
        &request(json!({"kind": "Book", "filter": "year < 1950", "count": true})),
        &metrics,
    )
    .unwrap();
    assert_eq!(response, json!({"count": 2}));
}
