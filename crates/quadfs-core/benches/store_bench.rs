//! # Store Benchmarks
//!
//! Performance benchmarks for quadfs-core graph, filesystem and query paths.
//!
//! Run with: `cargo bench -p quadfs-core`

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use quadfs_core::{CommitContext, Principal, Quad, QuadPattern, QuadSet, QuadStore, Store, Term};
use std::hint::black_box;

fn admin() -> CommitContext {
    CommitContext::new(Principal::admin("bench", "Bench"))
}

/// A store with `size` files spread over ten directories.
fn populated_store(size: usize) -> Store {
    let store = Store::in_memory().expect("open");
    for i in 0..size {
        let path = format!("/d{}/f{}", i % 10, i);
        if i < 10 {
            store.vfs().mkdir(&admin(), &format!("/d{}", i)).expect("mkdir");
        }
        store
            .vfs()
            .write(&admin(), &path, &mut &b"payload"[..])
            .expect("write");
    }
    store
}

fn quad_set(size: usize) -> QuadSet {
    (0..size)
        .map(|i| {
            Quad::new(
                Term::iri(format!("urn:s{}", i % 100)),
                Term::iri("urn:p"),
                Term::literal(i.to_string()),
            )
        })
        .collect()
}

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_quad_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("quad_lookup");

    for size in [1000, 10000].iter() {
        let set = quad_set(*size);
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                black_box(set.find(&QuadPattern::default_graph().subject(Term::iri("urn:s42"))))
            });
        });
    }

    group.finish();
}

fn bench_write_file(c: &mut Criterion) {
    let store = Store::in_memory().expect("open");
    store.vfs().mkdir(&admin(), "/bench").expect("mkdir");
    let payload = vec![7u8; 4096];

    c.bench_function("write_4k_file", |b| {
        b.iter(|| {
            store
                .vfs()
                .write(&admin(), "/bench/file", &mut payload.as_slice())
                .expect("write")
        });
    });
}

fn bench_stat_and_list(c: &mut Criterion) {
    let mut group = c.benchmark_group("stat_and_list");

    for size in [100, 1000].iter() {
        let store = populated_store(*size);
        let principal = Principal::admin("bench", "Bench");
        group.bench_with_input(BenchmarkId::new("stat", size), size, |b, _| {
            b.iter(|| black_box(store.vfs().stat(&principal, "/d3/f13").expect("stat")));
        });
        group.bench_with_input(BenchmarkId::new("list", size), size, |b, _| {
            b.iter(|| black_box(store.vfs().list(&principal, "/d3").expect("list")));
        });
    }

    group.finish();
}

fn bench_query(c: &mut Criterion) {
    let store = populated_store(500);
    let principal = Principal::admin("bench", "Bench");

    c.bench_function("query_files_with_size", |b| {
        b.iter(|| {
            black_box(
                store
                    .query(
                        &principal,
                        "SELECT ?f ?size WHERE { ?f a fs:File ; fs:fileSize ?size }",
                    )
                    .expect("query"),
            )
        });
    });
}

fn bench_export_canonical(c: &mut Criterion) {
    let store = populated_store(500);
    c.bench_function("export_canonical", |b| {
        b.iter(|| black_box(store.export_canonical().expect("export")));
    });
}

criterion_group!(
    benches,
    bench_quad_lookup,
    bench_write_file,
    bench_stat_and_list,
    bench_query,
    bench_export_canonical,
);

criterion_main!(benches);
