//! Criterion benchmarks for the hot paths: the evaluator decision loop
//! (cache-hit and cache-miss), the ledger append path, and Merkle batch
//! construction.
//!
//! Run with `cargo bench -p warden-tests`.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use warden_ledger::merkle_root;
use warden_store::Clock;
use warden_tests::integration::fixtures::Harness;
use warden_types::{EventBody, EventType};

/// Evaluator throughput with warm caches; the p99 budget is < 5 ms.
fn bench_evaluate_cache_hit(c: &mut Criterion) {
    let h = Harness::new();
    let p = h.principal();
    h.standard_policy(p);
    let mandate = h.issue(p, p);
    let request = h.request(&mandate, "call", "api:openai:gpt-4");
    // Warm the chain and policy caches.
    assert!(h.evaluator.evaluate(&request).allowed);

    c.bench_function("evaluate_allow_cache_hit", |b| {
        b.iter(|| h.evaluator.evaluate(black_box(&request)))
    });
}

/// Evaluator throughput with cold caches; dominated by store reads and
/// chain signature verification (budget < 50 ms).
fn bench_evaluate_cache_miss(c: &mut Criterion) {
    let h = Harness::new();
    let p = h.principal();
    h.standard_policy(p);
    let mandate = h.issue(p, p);
    let request = h.request(&mandate, "call", "api:openai:gpt-4");

    c.bench_function("evaluate_allow_cache_miss", |b| {
        b.iter(|| {
            h.evaluator.apply_change(&warden_types::ChangeNotice::MandateRevoked {
                mandate_id: uuid::Uuid::new_v4(),
            });
            h.evaluator.evaluate(black_box(&request))
        })
    });
}

/// Ledger append path: id reservation, canonical hashing, committed row.
fn bench_ledger_append(c: &mut Criterion) {
    let h = Harness::new();
    let p = h.principal();
    let writer = h.ledger.writer_for(&p).expect("writer").clone();

    c.bench_function("ledger_append_metering", |b| {
        b.iter(|| {
            let body = EventBody::new(p, EventType::Metering, h.clock.now_ms());
            writer.append(black_box(body)).expect("append")
        })
    });
}

/// Merkle root over a full-size batch of 1024 leaves.
fn bench_merkle_root(c: &mut Criterion) {
    let leaves: Vec<[u8; 32]> = (0u64..1024)
        .map(|i| warden_crypto::sha256(&i.to_be_bytes()))
        .collect();

    c.bench_function("merkle_root_1024", |b| {
        b.iter(|| merkle_root(black_box(&leaves)))
    });
}

criterion_group!(
    benches,
    bench_evaluate_cache_hit,
    bench_evaluate_cache_miss,
    bench_ledger_append,
    bench_merkle_root
);
criterion_main!(benches);
