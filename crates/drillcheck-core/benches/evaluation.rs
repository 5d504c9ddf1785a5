use criterion::{black_box, criterion_group, criterion_main, Criterion};

use drillcheck_core::compare::{compare_rows, CompareOptions};
use drillcheck_core::concept::{evaluate_deterministic, EvaluationOptions};
use drillcheck_core::model::OrderingKey;
use drillcheck_core::text::levenshtein;
use serde_json::json;

fn key_terms() -> Vec<String> {
    ["consistency", "availability", "partition tolerance", "latency", "quorum"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn bench_levenshtein(c: &mut Criterion) {
    let mut group = c.benchmark_group("levenshtein");

    group.bench_function("short", |b| {
        b.iter(|| levenshtein(black_box("latency"), black_box("latancy")))
    });

    group.bench_function("long", |b| {
        let a = "eventual consistency across replicas".repeat(4);
        let z = "eventually consistent across replica".repeat(4);
        b.iter(|| levenshtein(black_box(&a), black_box(&z)))
    });

    group.finish();
}

fn bench_concept(c: &mut Criterion) {
    let mut group = c.benchmark_group("concept_evaluate");
    let options = EvaluationOptions::default();
    let terms = key_terms();

    group.bench_function("complete", |b| {
        let answer = "Under a network partition a system trades consistency for availability. \
                      Partition tolerance is mandatory; latency and quorum sizes shape the trade-off.";
        b.iter(|| evaluate_deterministic(black_box(answer), black_box(&terms), &options))
    });

    group.bench_function("fuzzy", |b| {
        let answer = "Consistancy and availabilty, with some latancy.";
        b.iter(|| evaluate_deterministic(black_box(answer), black_box(&terms), &options))
    });

    group.bench_function("long_answer", |b| {
        let answer = "Replicas acknowledge writes before the leader commits them. ".repeat(40);
        b.iter(|| evaluate_deterministic(black_box(&answer), black_box(&terms), &options))
    });

    group.finish();
}

fn bench_compare(c: &mut Criterion) {
    let mut group = c.benchmark_group("compare_rows");
    let rows: Vec<Vec<serde_json::Value>> = (0..500)
        .map(|i| vec![json!(format!("user-{i}")), json!(i as f64 * 1.5)])
        .collect();
    let mut shuffled = rows.clone();
    shuffled.reverse();

    group.bench_function("unordered_500", |b| {
        let options = CompareOptions::default();
        b.iter(|| compare_rows(black_box(&rows), black_box(&shuffled), &options))
    });

    group.bench_function("ordered_500", |b| {
        let options = CompareOptions::default().with_ordering(vec![OrderingKey::asc("2")]);
        b.iter(|| compare_rows(black_box(&rows), black_box(&shuffled), &options))
    });

    group.finish();
}

criterion_group!(benches, bench_levenshtein, bench_concept, bench_compare);
criterion_main!(benches);
