//! Benchmarks for context entry, activation and header encoding.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ctxflow::prelude::*;
use std::sync::Arc;

fn policy() -> Arc<PropagationPolicy> {
    Arc::new(
        PropagationPolicy::builder()
            .with_down_mode("tenant", DownMode::ProcessLocal)
            .with_up_mode("requestId", UpMode::ProcessLocal)
            .build(),
    )
}

fn context_benchmark(c: &mut Criterion) {
    let policy = policy();
    let root = ContextNode::enter(None, &policy);
    root.set_value("tenant", "acme").unwrap();
    root.make_active().unwrap();

    c.bench_function("sync_child_lifecycle", |b| {
        b.iter(|| {
            let child = ContextNode::enter(Some(&root), &policy);
            child.make_active().unwrap();
            black_box(child.get("tenant").unwrap());
            child.close().unwrap();
        })
    });

    c.bench_function("sync_child_up_propagation", |b| {
        b.iter(|| {
            let child = ContextNode::enter(Some(&root), &policy);
            child.make_active().unwrap();
            child.set_value("requestId", "r1").unwrap();
            child.close().unwrap();
        })
    });

    let codec = HeaderCodec::new();
    let span = SpanContext::generate(true);
    c.bench_function("down_propagation_headers", |b| {
        b.iter(|| black_box(root.down_propagation_headers(&codec, Some(&span)).unwrap()))
    });

    root.close().unwrap();
}

criterion_group!(benches, context_benchmark);
criterion_main!(benches);
