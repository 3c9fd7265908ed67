//! Performance benchmarks for harbor-engine

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use harbor_engine::{
    plan_reconcile, Document, EntitySchema, FieldDef, FieldKind, Predicate, Query, ScalarKind,
    Schema, Store, Translator,
};
use serde_json::json;
use std::collections::BTreeSet;

fn create_test_schema() -> Schema {
    Schema::new(1).with_collection(EntitySchema::new(
        "users",
        vec![
            FieldDef::required("name", FieldKind::Scalar(ScalarKind::String)),
            FieldDef::optional("email", FieldKind::Scalar(ScalarKind::String)),
            FieldDef::optional("age", FieldKind::Scalar(ScalarKind::Int)),
            FieldDef::optional("tags", FieldKind::WrappedList(ScalarKind::String)),
        ],
    ))
}

fn user(i: usize) -> Document {
    json!({
        "_id": format!("user_{i}"),
        "name": format!("User {i}"),
        "age": i % 90,
        "tags": [format!("t{}", i % 10), "common"],
        "_kmd": {"lmt": format!("2024-01-01T00:00:{:02}.000Z", i % 60)}
    })
    .as_object()
    .cloned()
    .unwrap_or_default()
}

fn populated_store(size: usize) -> Store {
    let mut store = Store::new(create_test_schema());
    let _ = store.save_many("users", (0..size).map(user).collect());
    store
}

fn bench_store_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_operations");

    group.bench_function("save", |b| {
        let mut store = Store::new(create_test_schema());
        let mut i = 0;
        b.iter(|| {
            i += 1;
            store.save(black_box("users"), black_box(user(i)))
        })
    });

    group.bench_function("find_by_id", |b| {
        let store = populated_store(1000);
        b.iter(|| store.find_by_id(black_box("users"), black_box("user_500")))
    });

    group.finish();
}

fn bench_queries(c: &mut Criterion) {
    let mut group = c.benchmark_group("queries");

    for size in [100, 1000, 5000].iter() {
        let store = populated_store(*size);

        let scalar = Query::filter(Predicate::gt("age", 40)).sort_by("name", true);
        group.bench_with_input(BenchmarkId::new("scalar_filter_sorted", size), size, |b, _| {
            b.iter(|| store.find("users", black_box(&scalar), Utc::now()))
        });

        let wrapped = Query::filter(Predicate::contains("tags", "t3")).limit(20);
        group.bench_with_input(BenchmarkId::new("wrapped_contains", size), size, |b, _| {
            b.iter(|| store.find("users", black_box(&wrapped), Utc::now()))
        });
    }

    group.finish();
}

fn bench_translation(c: &mut Criterion) {
    let schema = create_test_schema();
    let entity = schema.get_collection("users").cloned().unwrap_or_else(|| {
        EntitySchema::new("users", Vec::new())
    });
    let predicate = Predicate::contains("tags", "a")
        .and(Predicate::eq("metadata.lmt", "x"))
        .or(Predicate::eq("tags", "b").negate());

    c.bench_function("translate_predicate", |b| {
        let translator = Translator::new(&entity);
        b.iter(|| translator.translate(black_box(&predicate)))
    });
}

fn bench_reconcile(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconcile");

    for size in [100, 1000].iter() {
        let store = populated_store(*size);
        let local = store
            .find_ids_and_versions("users", &Query::new())
            .unwrap_or_default();
        let remote: Vec<Document> = (0..*size)
            .map(|i| {
                let mut doc = user(i);
                if i % 3 == 0 {
                    doc.insert("_kmd".into(), json!({"lmt": "2024-02-01T00:00:00.000Z"}));
                }
                doc
            })
            .collect();
        let pinned = BTreeSet::new();

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| plan_reconcile(&local, black_box(remote.clone()), &pinned, true))
        });
    }

    group.finish();
}

fn bench_snapshot(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot");

    for size in [100, 1000].iter() {
        let store = populated_store(*size);
        group.bench_with_input(BenchmarkId::new("export_to_json", size), size, |b, _| {
            b.iter(|| store.export_state().to_json())
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_store_operations,
    bench_queries,
    bench_translation,
    bench_reconcile,
    bench_snapshot
);
criterion_main!(benches);
