use convoy_core::{merge_batch, Entity, MergeMode, NicRecord, Predicate};
use criterion::{criterion_group, criterion_main, Criterion};
use serde_json::json;
use std::hint::black_box;

fn bench_nics(count: usize) -> (Vec<NicRecord>, Vec<NicRecord>) {
    let existing = (0..count)
        .map(|i| NicRecord::new(format!("00:00:00:00:{:02x}:{:02x}", i / 256, i % 256), ["admin", "external"]))
        .collect::<Vec<_>>();
    let deltas = existing
        .iter()
        .step_by(2)
        .map(|nic| NicRecord::new(nic.mac.clone(), ["storage"]))
        .collect();
    (existing, deltas)
}

fn bench_merge_batch(c: &mut Criterion) {
    let (existing, deltas) = bench_nics(512);

    c.bench_function("merge/batch_union_512", |b| {
        b.iter(|| {
            let batch = merge_batch(black_box(&existing), black_box(&deltas), MergeMode::Union);
            black_box(batch.merged.len());
        });
    });
}

fn bench_predicate(c: &mut Criterion) {
    let leaves = (0..64).map(|i| Predicate::identifier(format!("vm-{i}")));
    let disjunction = Predicate::any(leaves.chain([Predicate::attribute("role", None)]));
    let pred = Predicate::all([Predicate::owner("owner-1")].into_iter().chain(disjunction));
    let entities: Vec<Entity> = (0..256)
        .map(|i| Entity::new(format!("vm-{i}"), "owner-1", format!("node-{}", i % 8)).with_attribute("tier", json!(i)))
        .collect();

    c.bench_function("filter/serialize_65_leaves", |b| {
        b.iter(|| black_box(pred.as_ref().map(Predicate::to_filter)));
    });

    c.bench_function("filter/match_256_entities", |b| {
        b.iter(|| {
            let hits = entities
                .iter()
                .filter(|e| pred.as_ref().is_some_and(|p| p.matches(e)))
                .count();
            black_box(hits);
        });
    });
}

criterion_group!(benches, bench_merge_batch, bench_predicate);
criterion_main!(benches);
