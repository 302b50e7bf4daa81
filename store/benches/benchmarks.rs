//! Performance benchmarks for lattice-store

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use lattice_store::{
    read, Argument, FragmentCatalog, LinkedField, OperationDescriptor, PublishQueue, RecordSource,
    ScalarField, Selection, Store, Variables,
};
use serde_json::{json, Value};

fn friends_operation() -> OperationDescriptor {
    OperationDescriptor::new(
        "FriendsQuery",
        vec![Selection::Linked(
            LinkedField::plural(
                "friends",
                vec![
                    Selection::Scalar(ScalarField::new("id")),
                    Selection::Scalar(ScalarField::new("name")),
                    Selection::Scalar(ScalarField::new("age")),
                ],
            )
            .with_args(vec![Argument::literal("first", json!(100))]),
        )],
        Variables::new(),
    )
}

fn friends_response(count: usize, name: &str) -> Value {
    let friends: Vec<Value> = (0..count)
        .map(|i| {
            json!({
                "id": format!("user_{i}"),
                "name": format!("{name} {i}"),
                "age": 20 + (i % 50),
                "__typename": "User",
            })
        })
        .collect();
    json!({ "friends": friends })
}

fn bench_normalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("normalize");
    let operation = friends_operation();
    let response = friends_response(100, "User");
    let fragments = FragmentCatalog::new();

    group.bench_function("normalize_100_friends", |b| {
        b.iter(|| {
            let mut source = RecordSource::new();
            lattice_store::normalize(
                &mut source,
                &fragments,
                black_box(&operation.root),
                black_box(&response),
            )
            .unwrap();
            source
        })
    });

    group.finish();
}

fn bench_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("read");
    let operation = friends_operation();
    let response = friends_response(100, "User");
    let fragments = FragmentCatalog::new();

    let mut source = RecordSource::new();
    lattice_store::normalize(&mut source, &fragments, &operation.root, &response).unwrap();

    group.bench_function("read_100_friends", |b| {
        b.iter(|| read(black_box(&source), &fragments, &operation.root).unwrap())
    });

    group.finish();
}

fn bench_publish_notify(c: &mut Criterion) {
    let mut group = c.benchmark_group("publish_notify");
    let operation = friends_operation();

    group.bench_function("publish_notify_cycle", |b| {
        let mut store = Store::new(FragmentCatalog::new());
        let mut queue = PublishQueue::new();
        queue
            .commit_payload(
                store.fragments(),
                &operation,
                &friends_response(100, "User"),
            )
            .unwrap();
        queue.run(&mut store).unwrap();
        store.notify().unwrap();

        let snapshot = store.lookup(&operation.root).unwrap();
        store.subscribe(snapshot, |next| {
            black_box(next.is_missing_data);
        });

        let mut generation = 0u64;
        b.iter(|| {
            generation += 1;
            queue
                .commit_payload(
                    store.fragments(),
                    &operation,
                    &friends_response(100, &format!("Gen{generation}")),
                )
                .unwrap();
            queue.run(&mut store).unwrap();
            store.notify().unwrap()
        })
    });

    group.finish();
}

criterion_group!(benches, bench_normalize, bench_read, bench_publish_notify);
criterion_main!(benches);
