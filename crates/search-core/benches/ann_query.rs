use criterion::{Criterion, criterion_group, criterion_main};
use search_core::AnnGraph;

fn point(seed: usize, dim: usize) -> Vec<f32> {
    (0..dim)
        .map(|i| ((seed * 31 + i * 7) as f32 * 0.173).sin())
        .collect()
}

fn bench_ann(c: &mut Criterion) {
    let dim = 64;
    let mut graph = AnnGraph::new(dim, 16, 100);
    for seed in 0..2_000 {
        graph.insert(&point(seed, dim));
    }
    let probe = point(4_242, dim);

    c.bench_function("ann_search_k10_ef50_2000", |b| {
        b.iter(|| {
            let _ = graph.search(&probe, 10, 50);
        })
    });

    c.bench_function("ann_insert_into_2000", |b| {
        b.iter_batched(
            || graph.clone(),
            |mut g| {
                g.insert(&probe);
            },
            criterion::BatchSize::LargeInput,
        )
    });
}

criterion_group!(benches, bench_ann);
criterion_main!(benches);
