//! Performance benchmarks for rule evaluation and change fan-out.

use chembase::value::document_from_json;
use chembase::{
    BeakerId, ChangeDispatcher, ConditionMap, ConnectionId, DispatcherConfig, DocumentStore,
    EvalContext, MemoryStore, Rule, Session, SubscriberMessage, Value,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use std::sync::Arc;

const RULE: &str = "request.user.role == 'admin' || (compound.owner == request.user.id \
                    && compound.age >= 18 && contains(compound.tags, 'public'))";

fn context() -> EvalContext {
    EvalContext::new()
        .with_variable(
            "request",
            Value::from_json(json!({ "user": { "id": "u1", "role": "member" } })),
        )
        .with_variable(
            "compound",
            Value::from_json(json!({ "owner": "u1", "age": 30, "tags": ["public", "news"] })),
        )
}

/// Benchmark parsing and both evaluation modes of a typical rule
fn bench_rule_evaluation(c: &mut Criterion) {
    let mut group = c.benchmark_group("rule_evaluation");

    group.bench_function("parse", |b| b.iter(|| black_box(Rule::parse(RULE).unwrap())));

    let rule = Rule::parse(RULE).unwrap();
    let ctx = context();
    group.bench_function("concrete", |b| {
        b.iter(|| black_box(rule.evaluate(&ctx).unwrap()));
    });

    let conditions = ConditionMap::from_json(json!({
        "owner": "u1",
        "age": { "$gte": 21 },
        "tags": "public"
    }))
    .unwrap();
    let symbolic_ctx = EvalContext::new().with_variable(
        "request",
        Value::from_json(json!({ "user": { "id": "u1", "role": "member" } })),
    );
    group.bench_function("query_symbolic", |b| {
        b.iter(|| black_box(rule.evaluate_query(&symbolic_ctx, &conditions)));
    });

    group.finish();
}

/// Benchmark one write delivered to many subscribers of a shared group
fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_out");
    let beaker = BeakerId::from("posts");

    for subscribers in [1usize, 10, 100] {
        group.bench_with_input(
            BenchmarkId::new("subscribers", subscribers),
            &subscribers,
            |b, &count| {
                let store = Arc::new(MemoryStore::new());
                let dispatcher = ChangeDispatcher::new(
                    store.clone(),
                    DispatcherConfig {
                        subscriber_buffer: 16,
                    },
                );
                let conditions = ConditionMap::from_json(json!({ "kind": "post" })).unwrap();
                let mut sessions: Vec<_> = (0..count)
                    .map(|i| Session::new(ConnectionId(i as u64), Value::Null))
                    .collect();
                let handles: Vec<_> = sessions
                    .iter_mut()
                    .map(|s| dispatcher.subscribe(s, &beaker, &conditions).unwrap())
                    .collect();

                b.iter(|| {
                    store
                        .insert_one(&beaker, document_from_json(json!({ "kind": "post" })))
                        .unwrap();
                    for handle in &handles {
                        match handle.recv() {
                            Ok(SubscriberMessage::Change(bytes)) => {
                                black_box(bytes);
                            }
                            other => panic!("unexpected {other:?}"),
                        }
                    }
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_rule_evaluation, bench_fan_out);
criterion_main!(benches);
