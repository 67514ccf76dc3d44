use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use perfcompare::bench::{shard, BatchSpec};
use std::path::PathBuf;

fn bench_shard(c: &mut Criterion) {
    let definitions: Vec<PathBuf> = (0..1500)
        .map(|i| PathBuf::from(format!("tests/performance/bench_{i:04}.xml")))
        .collect();

    let mut group = c.benchmark_group("shard");
    for total in [1usize, 4, 16] {
        let spec = BatchSpec::new(total - 1, total).unwrap_or_default();
        group.bench_with_input(BenchmarkId::from_parameter(total), &spec, |b, spec| {
            b.iter(|| shard(black_box(&definitions), *spec));
        });
    }
    group.finish();
}

fn bench_parse(c: &mut Criterion) {
    c.bench_function("batch_spec_parse", |b| {
        b.iter(|| black_box("3/16").parse::<BatchSpec>());
    });
}

criterion_group!(benches, bench_shard, bench_parse);
criterion_main!(benches);
