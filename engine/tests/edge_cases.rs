//! Edge case tests for harbor-engine
//!
//! These tests cover boundary conditions and unusual inputs.

use chrono::{DateTime, Utc};
use harbor_engine::{
    parse_timestamp, CompareOp, Document, ElementIndex, EntitySchema, Error, Expr, FieldDef,
    FieldKind, Method, PendingOperation, Predicate, Query, ScalarKind, Schema, Store,
    StoreSnapshot,
};
use serde_json::{json, Value};
use std::time::Duration;

fn author_schema() -> EntitySchema {
    EntitySchema::embedded(
        "Author",
        vec![
            FieldDef::required("name", FieldKind::Scalar(ScalarKind::String)),
            FieldDef::optional("aliases", FieldKind::WrappedList(ScalarKind::String)),
        ],
    )
}

fn create_test_schema() -> Schema {
    Schema::new(1).with_collection(EntitySchema::new(
        "items",
        vec![
            FieldDef::required("name", FieldKind::Scalar(ScalarKind::String)),
            FieldDef::optional("count", FieldKind::Scalar(ScalarKind::Int)),
            FieldDef::optional("data", FieldKind::Json),
            FieldDef::optional("scores", FieldKind::WrappedList(ScalarKind::Int)),
            FieldDef::optional("authors", FieldKind::EmbeddedList(Box::new(author_schema()))),
        ],
    ))
}

fn doc(value: Value) -> Document {
    value.as_object().cloned().unwrap()
}

fn now() -> DateTime<Utc> {
    parse_timestamp("2024-06-01T00:00:00.000Z").unwrap()
}

fn ids(documents: &[Document]) -> Vec<String> {
    documents
        .iter()
        .filter_map(|d| d["_id"].as_str().map(str::to_string))
        .collect()
}

// ============================================================================
// String Edge Cases
// ============================================================================

#[test]
fn empty_string_fields() {
    let mut store = Store::new(create_test_schema());
    store.save("items", doc(json!({"_id": "i1", "name": ""}))).unwrap();

    let record = store.find_by_id("items", "i1").unwrap().unwrap();
    assert_eq!(record["name"], "");

    let found = store
        .find("items", &Query::filter(Predicate::eq("name", "")), now())
        .unwrap();
    assert_eq!(found.len(), 1);
}

#[test]
fn empty_id_is_missing() {
    let mut store = Store::new(create_test_schema());
    let err = store
        .save("items", doc(json!({"_id": "", "name": "x"})))
        .unwrap_err();
    assert_eq!(err, Error::ObjectIdMissing);
}

#[test]
fn unicode_strings() {
    let mut store = Store::new(create_test_schema());
    let names = ["日本語テスト", "Привет мир", "🎉🚀💯", "Hello\nWorld\tTab"];

    for (i, name) in names.iter().enumerate() {
        store
            .save("items", doc(json!({"_id": format!("u{i}"), "name": name})))
            .unwrap();
    }

    for (i, name) in names.iter().enumerate() {
        let record = store.find_by_id("items", &format!("u{i}")).unwrap().unwrap();
        assert_eq!(record["name"], *name);
    }

    let found = store
        .find(
            "items",
            &Query::filter(Predicate::begins_with("name", "Привет")),
            now(),
        )
        .unwrap();
    assert_eq!(ids(&found), vec!["u1"]);
}

#[test]
fn regex_metacharacters_are_literal_remotely() {
    let remote = Query::filter(Predicate::contains("name", "a.b*"))
        .to_remote(None)
        .unwrap();
    assert_eq!(remote.filter.unwrap(), json!({"name": {"$regex": "a\\.b\\*"}}));
}

// ============================================================================
// Skip / Limit Edge Cases
// ============================================================================

fn store_with_counts(n: i64) -> Store {
    let mut store = Store::new(create_test_schema());
    let documents = (0..n)
        .map(|i| doc(json!({"_id": format!("i{i:02}"), "name": "x", "count": i})))
        .collect();
    store.save_many("items", documents).unwrap();
    store
}

#[test]
fn skip_and_limit_are_clamped() {
    let store = store_with_counts(5);
    let sorted = Query::new().sort_by("count", true);

    assert_eq!(store.find("items", &sorted.clone().skip(3), now()).unwrap().len(), 2);
    assert_eq!(store.find("items", &sorted.clone().skip(5), now()).unwrap().len(), 0);
    assert_eq!(store.find("items", &sorted.clone().skip(50), now()).unwrap().len(), 0);
    assert_eq!(store.find("items", &sorted.clone().limit(0), now()).unwrap().len(), 0);
    assert_eq!(store.find("items", &sorted.clone().limit(50), now()).unwrap().len(), 5);
    assert_eq!(
        store
            .find("items", &sorted.clone().skip(4).limit(usize::MAX), now())
            .unwrap()
            .len(),
        1
    );
}

#[test]
fn window_applies_after_sort() {
    let store = store_with_counts(5);
    let query = Query::new().sort_by("count", false).skip(1).limit(2);
    let found = store.find("items", &query, now()).unwrap();
    assert_eq!(ids(&found), vec!["i03", "i02"]);
}

#[test]
fn empty_collection_queries() {
    let store = Store::new(create_test_schema());
    assert!(store.find("items", &Query::new(), now()).unwrap().is_empty());
    assert_eq!(store.count("items", None, now()).unwrap(), 0);
    assert!(store.find_all("items").unwrap().is_empty());
}

// ============================================================================
// TTL Edge Cases
// ============================================================================

#[test]
fn ttl_boundary_and_unparseable_lmt() {
    let mut store = Store::new(create_test_schema());
    store
        .save_many(
            "items",
            vec![
                doc(json!({"_id": "exact", "name": "x", "_kmd": {"lmt": "2024-05-31T23:59:00.000Z"}})),
                doc(json!({"_id": "stale", "name": "x", "_kmd": {"lmt": "2024-05-31T23:58:59.999Z"}})),
                doc(json!({"_id": "remote-format", "name": "x", "_kmd": {"lmt": "2024-05-31T23:59:30.000+0000"}})),
                doc(json!({"_id": "garbage", "name": "x", "_kmd": {"lmt": "not a time"}})),
            ],
        )
        .unwrap();

    let found = store
        .find("items", &Query::new().ttl(Duration::from_secs(60)), now())
        .unwrap();
    assert_eq!(ids(&found), vec!["exact", "garbage", "remote-format"]);
    assert_eq!(store.count("items", None, now()).unwrap(), 4);
}

#[test]
fn remove_by_query_ignores_ttl() {
    let mut store = Store::new(create_test_schema());
    store
        .save(
            "items",
            doc(json!({"_id": "old", "name": "x", "_kmd": {"lmt": "2000-01-01T00:00:00.000Z"}})),
        )
        .unwrap();
    let query = Query::filter(Predicate::eq("name", "x")).ttl(Duration::from_secs(1));
    assert!(store.find("items", &query, now()).unwrap().is_empty());
    assert_eq!(store.remove_by_query("items", &query).unwrap(), 1);
}

// ============================================================================
// Wrapped Scalar Edge Cases
// ============================================================================

#[test]
fn empty_and_missing_wrapped_lists() {
    let mut store = Store::new(create_test_schema());
    store
        .save_many(
            "items",
            vec![
                doc(json!({"_id": "empty", "name": "x", "scores": []})),
                doc(json!({"_id": "missing", "name": "x"})),
                doc(json!({"_id": "some", "name": "x", "scores": [1, 2]})),
            ],
        )
        .unwrap();

    let contains = Query::filter(Predicate::contains("scores", 2));
    assert_eq!(ids(&store.find("items", &contains, now()).unwrap()), vec!["some"]);

    let none = Query::filter(
        Predicate::compare(Expr::count(Expr::key("scores")), CompareOp::Eq, Expr::value(0)),
    );
    assert_eq!(
        ids(&store.find("items", &none, now()).unwrap()),
        vec!["empty", "missing"]
    );

    let last = Query::filter(Predicate::compare(
        Expr::element_at("scores", ElementIndex::Last),
        CompareOp::Eq,
        Expr::value(2),
    ));
    assert_eq!(ids(&store.find("items", &last, now()).unwrap()), vec!["some"]);

    let empty = store.find_by_id("items", "empty").unwrap().unwrap();
    assert_eq!(empty["scores"], json!([]));
}

#[test]
fn wrapped_lists_inside_embedded_records() {
    let mut store = Store::new(create_test_schema());
    store
        .save(
            "items",
            doc(json!({
                "_id": "b1",
                "name": "Good Omens",
                "authors": [
                    {"name": "Terry", "aliases": ["TP"]},
                    {"name": "Neil", "aliases": ["NG", "Gaiman"]}
                ]
            })),
        )
        .unwrap();

    let by_alias = Query::filter(Predicate::eq("authors.aliases", "Gaiman"));
    assert_eq!(ids(&store.find("items", &by_alias, now()).unwrap()), vec!["b1"]);

    let sub = Query::filter(Predicate::compare(
        Expr::count(Expr::subquery(
            Expr::key("authors"),
            "$a",
            Predicate::compare(Expr::var("$a", Some("aliases")), CompareOp::Contains, Expr::value("TP")),
        )),
        CompareOp::Eq,
        Expr::value(1),
    ));
    assert_eq!(ids(&store.find("items", &sub, now()).unwrap()), vec!["b1"]);

    let stored = store.collection("items").unwrap().get("b1").unwrap();
    assert_eq!(stored["authors"][1]["aliases"], json!([{"value": "NG"}, {"value": "Gaiman"}]));
}

// ============================================================================
// Json Field Edge Cases
// ============================================================================

#[test]
fn deeply_nested_json() {
    let mut store = Store::new(create_test_schema());
    store
        .save(
            "items",
            doc(json!({"_id": "n", "name": "x", "data": {"a": {"b": {"c": [1, {"d": true}]}}}})),
        )
        .unwrap();
    let query = Query::filter(Predicate::eq("data.a.b.c.d", true));
    assert_eq!(ids(&store.find("items", &query, now()).unwrap()), vec!["n"]);
}

#[test]
fn null_field_values() {
    let mut store = Store::new(create_test_schema());
    store
        .save("items", doc(json!({"_id": "n", "name": "x", "count": null})))
        .unwrap();
    let query = Query::filter(Predicate::eq("count", Value::Null));
    assert_eq!(store.find("items", &query, now()).unwrap().len(), 1);
}

// ============================================================================
// Pending Operation Edge Cases
// ============================================================================

#[test]
fn pending_without_object_id() {
    let mut store = Store::new(create_test_schema());
    let op = PendingOperation::new("r1", "items", Method::Delete, "https://h/items?query={}", 0);
    store.enqueue(op);
    assert!(store.pending_object_ids("items").is_empty());
    assert_eq!(store.pending_count(Some("items")), 1);
}

#[test]
fn many_pending_operations_stay_ordered() {
    let mut store = Store::new(create_test_schema());
    for i in 0..500 {
        let op = PendingOperation::new(format!("r{i}"), "items", Method::Put, "u", 0)
            .with_object_id(format!("o{}", i % 7));
        store.enqueue(op);
    }
    let sequences: Vec<u64> = store.pending(None).iter().map(|p| p.sequence).collect();
    assert!(sequences.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(store.clear_pending(None), 500);
}

// ============================================================================
// Snapshot Edge Cases
// ============================================================================

#[test]
fn snapshot_roundtrip_through_json() {
    let mut store = Store::new(create_test_schema());
    store
        .save("items", doc(json!({"_id": "a", "name": "x", "scores": [3]})))
        .unwrap();
    store.enqueue(PendingOperation::new("r1", "items", Method::Put, "u", 0).with_object_id("a"));

    let json = store.export_state().to_json_pretty().unwrap();
    let restored = Store::from_snapshot(StoreSnapshot::from_json(&json).unwrap()).unwrap();

    assert_eq!(restored.find_all("items").unwrap(), store.find_all("items").unwrap());
    assert!(restored.has_pending_for("items", "a"));
}

#[test]
fn import_rejects_other_schema_version() {
    let store = Store::new(create_test_schema());
    let snapshot = store.export_state();

    let mut newer = create_test_schema();
    newer.version = 2;
    let mut other = Store::new(newer);
    assert!(matches!(
        other.import_state(snapshot),
        Err(Error::SchemaVersionMismatch { .. })
    ));
}

#[test]
fn import_rejects_mismatched_ids() {
    let store = Store::new(create_test_schema());
    let mut snapshot = store.export_state();
    snapshot
        .collections
        .entry("items".into())
        .or_default()
        .insert("a".into(), doc(json!({"_id": "b", "name": "x"})));
    assert!(matches!(
        Store::from_snapshot(snapshot),
        Err(Error::InvalidSnapshot(_))
    ));
}
