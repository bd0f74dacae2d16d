//! Query Execution Tests
//!
//! End-to-end compile and execute against the in-memory datastore:
//! - native filters, sorts and paging
//! - identifier lookups as batch gets
//! - in-memory fallback for shapes the datastore cannot serve
//! - cursor resumption
//! - counts and bulk delete

use std::collections::BTreeMap;

use kvquery::config::QueryConfig;
use kvquery::datastore::MemoryDatastore;
use kvquery::executor::{QueryExecutor, QueryOutput, RowsPage};
use kvquery::model::{Key, Record, Value};
use kvquery::planner::{
    parse_filter, parse_ordering, CompileError, ExecutionPlan, KindMetadata, Projection, Query,
    QueryCompiler, Unsupported,
};
use kvquery::QueryError;

// =============================================================================
// Helper Functions
// =============================================================================

fn kinds() -> BTreeMap<String, KindMetadata> {
    let mut kinds = BTreeMap::new();
    kinds.insert(
        "Book".to_string(),
        KindMetadata::default().with_id("id").with_parent("author"),
    );
    kinds.insert("Author".to_string(), KindMetadata::default());
    kinds
}

fn library() -> MemoryDatastore {
    let ann = Key::new("Author", "ann");
    let bob = Key::new("Author", "bob");
    let books = [
        (ann.clone(), 1, "Dune", 1965, "2"),
        (ann.clone(), 2, "Emma", 1815, "7"),
        (bob.clone(), 3, "Ulysses", 1922, "2"),
        (bob.clone(), 4, "Walden", 1854, "9"),
        (ann, 5, "Beloved", 1987, "4"),
    ];
    let mut records: Vec<Record> = books
        .into_iter()
        .map(|(author, id, title, year, edition)| {
            Record::new(Key::with_parent(author, "Book", id))
                .with("title", title)
                .with("year", year)
                .with("edition", edition)
        })
        .collect();
    records.push(Record::new(Key::new("Book", 6)).with("title", "Orphan").with("edition", 2));
    MemoryDatastore::from_records(records)
}

fn compile(query: &Query, config: &QueryConfig) -> Result<ExecutionPlan, CompileError> {
    let kinds = kinds();
    let plan = QueryCompiler::new(&kinds, config).compile(query);
    plan
}

fn run(store: &MemoryDatastore, query: &Query, config: &QueryConfig) -> Result<RowsPage, QueryError> {
    let plan = compile(query, config)?;
    let executor = QueryExecutor::new(store, config.clone());
    let page = match executor.execute(&plan)? {
        QueryOutput::Rows(rows) => RowsPage::collect(rows),
        QueryOutput::Count(n) => panic!("expected rows, got count {}", n),
    };
    page
}

fn titles(page: &RowsPage) -> Vec<&str> {
    page.records
        .iter()
        .map(|r| r.get("title").and_then(Value::as_text).unwrap_or(""))
        .collect()
}

fn book(filter: &str) -> Query {
    Query::new("Book").with_filter(parse_filter(filter).unwrap())
}

fn ordered(mut query: Query, order: &str) -> Query {
    query.sorts = parse_ordering(order).unwrap();
    query
}

// =============================================================================
// Native Query Tests
// =============================================================================

/// Equality never coerces across types; an OR over both spellings matches each.
#[test]
fn test_or_on_one_property_keeps_types_apart() {
    let store = library();
    let query = ordered(book("edition == '2' || edition == 2"), "year");
    let page = run(&store, &query, &QueryConfig::default()).unwrap();
    assert_eq!(titles(&page), vec!["Ulysses", "Dune"]);

    let query = book("edition == 2");
    let page = run(&store, &query, &QueryConfig::default()).unwrap();
    assert_eq!(titles(&page), vec!["Orphan"]);
}

/// Range filter led by its own sort, then paged natively.
#[test]
fn test_range_sort_and_paging() {
    let store = library();
    let query = ordered(book("year > 1850"), "year desc")
        .with_offset(1)
        .with_limit(2);
    let page = run(&store, &query, &QueryConfig::default()).unwrap();
    assert_eq!(titles(&page), vec!["Dune", "Ulysses"]);
}

/// NE is served as a two-sided range.
#[test]
fn test_not_equal() {
    let store = library();
    let query = ordered(book("year != 1922"), "year");
    let page = run(&store, &query, &QueryConfig::default()).unwrap();
    assert_eq!(titles(&page), vec!["Emma", "Walden", "Dune", "Beloved"]);
}

/// A prefix LIKE becomes a half-open range.
#[test]
fn test_like_prefix() {
    let store = library();
    let page = run(&store, &book("title LIKE 'W%'"), &QueryConfig::default()).unwrap();
    assert_eq!(titles(&page), vec!["Walden"]);
}

/// Ancestor filters restrict to descendants of the parent key.
#[test]
fn test_ancestor_filter() {
    let store = library();
    let query = book("author == :a").with_param("a", Key::new("Author", "bob"));
    let page = run(&store, &query, &QueryConfig::default()).unwrap();
    assert_eq!(titles(&page), vec!["Ulysses", "Walden"]);
}

/// Keys-only and projection output shapes.
#[test]
fn test_output_shapes() {
    let store = library();
    let query = book("title == 'Dune'").with_projection(Projection::KeysOnly);
    let page = run(&store, &query, &QueryConfig::default()).unwrap();
    assert_eq!(page.records.len(), 1);
    assert!(page.records[0].properties.is_empty());

    let query = book("title == 'Dune'").with_projection(Projection::Fields(vec!["year".into()]));
    let page = run(&store, &query, &QueryConfig::default()).unwrap();
    assert_eq!(page.records[0].get("year"), Some(&Value::from(1965)));
    assert_eq!(page.records[0].get("title"), None);
}

// =============================================================================
// Batch Get Tests
// =============================================================================

/// Identifier IN returns records in the order given, skipping missing ids.
#[test]
fn test_identifier_in_keeps_given_order() {
    let store = library();
    let query = book("id IN (6, 99, 3)");
    let plan = compile(&query, &QueryConfig::default()).unwrap();
    assert_eq!(plan.name(), "BATCH_GET_BY_KEYS");

    // Book 3 lives under an author, so only the root key resolves.
    let page = run(&store, &query, &QueryConfig::default()).unwrap();
    assert_eq!(titles(&page), vec!["Orphan"]);
}

// =============================================================================
// In-Memory Fallback Tests
// =============================================================================

/// OR across properties is rejected unless in-memory evaluation is allowed.
#[test]
fn test_or_across_properties_falls_back() {
    let store = library();
    let query = ordered(book("title == 'Emma' || year == 1922"), "year")
        .with_offset(0)
        .with_limit(5);

    let err = run(&store, &query, &QueryConfig::default()).unwrap_err();
    assert_eq!(err.code(), "QUERY_UNSUPPORTED_OPERATOR");

    let config = QueryConfig::default().with_in_memory_filter(true);
    let plan = compile(&query, &config).unwrap();
    assert_eq!(plan.name(), "NATIVE_QUERY_WITH_IN_MEMORY_FILTER");
    let page = run(&store, &query, &config).unwrap();
    assert_eq!(titles(&page), vec!["Emma", "Ulysses"]);
    assert!(page.cursor.is_none());
}

/// A sorted fallback drops records missing the sort property, as the
/// datastore does for the same sort.
#[test]
fn test_fallback_sort_matches_native_sort() {
    let store = library();
    let native = ordered(book("edition == 2 || edition == '2'"), "year");
    let config = QueryConfig::default().with_in_memory_filter(true);
    assert_eq!(compile(&native, &config).unwrap().name(), "SINGLE_NATIVE_QUERY");

    let fallback = ordered(book("edition == 2 || edition == '2' || year == 0"), "year");
    assert_eq!(
        compile(&fallback, &config).unwrap().name(),
        "NATIVE_QUERY_WITH_IN_MEMORY_FILTER"
    );

    let native_page = run(&store, &native, &config).unwrap();
    let fallback_page = run(&store, &fallback, &config).unwrap();
    assert_eq!(titles(&native_page), vec!["Ulysses", "Dune"]);
    assert_eq!(titles(&fallback_page), titles(&native_page));
}

/// Suffix LIKE is a shape error: rejected natively, evaluated in memory.
#[test]
fn test_suffix_like_falls_back() {
    let store = library();
    let query = book("title LIKE '%e%'");
    let err = compile(&query, &QueryConfig::default()).unwrap_err();
    assert!(matches!(
        err,
        CompileError::UnsupportedFeature(Unsupported::LikePattern(_))
    ));

    let config = QueryConfig::default().with_in_memory_filter(true);
    let page = run(&store, &ordered(query, "year"), &config).unwrap();
    assert_eq!(titles(&page), vec!["Walden", "Ulysses", "Dune", "Beloved"]);
}

// =============================================================================
// Cursor Tests
// =============================================================================

/// A cursor taken after a page resumes exactly where the page ended.
#[test]
fn test_cursor_resumes_after_page() {
    let store = library();
    let query = ordered(book("year > 1800"), "year").with_limit(2);

    let first = run(&store, &query, &QueryConfig::default()).unwrap();
    assert_eq!(titles(&first), vec!["Emma", "Walden"]);
    let cursor = first.cursor.clone().unwrap();

    let second = run(&store, &query.clone().with_cursor(cursor.clone()), &QueryConfig::default()).unwrap();
    assert_eq!(titles(&second), vec!["Ulysses", "Dune"]);

    let other = ordered(book("year > 1900"), "year").with_cursor(cursor);
    let err = run(&store, &other, &QueryConfig::default()).unwrap_err();
    assert_eq!(err.code(), "QUERY_CURSOR_MISMATCH");
}

/// Sizing the result materializes it, after which no cursor is offered.
#[test]
fn test_no_cursor_after_size() {
    let store = library();
    let plan = compile(&book("year > 1800"), &QueryConfig::default()).unwrap();
    let executor = QueryExecutor::new(&store, QueryConfig::default());
    let mut rows = executor.execute(&plan).unwrap().rows().unwrap();

    rows.get(0).unwrap();
    assert!(rows.cursor().is_some());
    assert_eq!(rows.size().unwrap(), 5);
    assert!(rows.cursor().is_none());
}

// =============================================================================
// Count and Delete Tests
// =============================================================================

#[test]
fn test_count() {
    let store = library();
    let query = book("year >= 1900").with_projection(Projection::count());
    let plan = compile(&query, &QueryConfig::default()).unwrap();
    let executor = QueryExecutor::new(&store, QueryConfig::default());
    assert_eq!(executor.execute(&plan).unwrap().count(), Some(3));
}

#[test]
fn test_bulk_delete() {
    let store = library();
    let query = book("author == :a").with_param("a", Key::new("Author", "ann"));
    let plan = compile(&query, &QueryConfig::default()).unwrap();
    let executor = QueryExecutor::new(&store, QueryConfig::default());

    assert_eq!(executor.delete(&plan).unwrap(), 3);
    assert_eq!(store.len(), 3);
    let page = run(&store, &Query::new("Book"), &QueryConfig::default()).unwrap();
    assert_eq!(titles(&page), vec!["Ulysses", "Walden", "Orphan"]);
}

// =============================================================================
// Rejection Tests
// =============================================================================

#[test]
fn test_rejections_never_touch_the_datastore() {
    let store = library();
    for (filter, code) in [
        ("year > 1 * 2", "QUERY_UNSUPPORTED_OPERATOR"),
        ("year == 1 || year > 5", "QUERY_UNSUPPORTED_FEATURE"),
        ("title == :missing", "QUERY_UNBOUND_PARAMETER"),
    ] {
        let err = run(&store, &book(filter), &QueryConfig::default()).unwrap_err();
        assert_eq!(err.code(), code, "filter {}", filter);
    }
    assert_eq!(store.records_served(), 0);
}
