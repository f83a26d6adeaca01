use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use hmatrix::{lu, Block, HMatrixOptions, HierarchicalBlock, PartitionOptions, UniformBlock};
use hmatrix_linalg::{lu_in_place, Matrix};

fn kernel(i: usize, j: usize) -> f64 {
    1.0 / (1.0 + (i as f64 - j as f64).abs())
}

fn bench_lu(c: &mut Criterion) {
    let mut group = c.benchmark_group("lu");
    let opts = HMatrixOptions::default();

    for &n in &[256, 512, 1024] {
        let partition = PartitionOptions::default().with_leaf_size(64).with_depth(4);

        group.bench_with_input(BenchmarkId::new("hierarchical", n), &n, |b, &n| {
            b.iter_batched(
                || Block::Hierarchical(HierarchicalBlock::from_fn(&kernel, n, n, &partition, &opts).unwrap()),
                |mut a| lu(&mut a, &opts).unwrap(),
                criterion::BatchSize::LargeInput,
            );
        });

        group.bench_with_input(BenchmarkId::new("uniform", n), &n, |b, &n| {
            b.iter_batched(
                || Block::Uniform(UniformBlock::from_fn(&kernel, n, n, &partition, &opts).unwrap()),
                |mut a| lu(&mut a, &opts).unwrap(),
                criterion::BatchSize::LargeInput,
            );
        });

        group.bench_with_input(BenchmarkId::new("dense", n), &n, |b, &n| {
            b.iter_batched(
                || Matrix::from_fn(n, n, kernel),
                |mut a| lu_in_place(&mut a).unwrap(),
                criterion::BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

fn bench_construction(c: &mut Criterion) {
    let mut group = c.benchmark_group("from_fn");
    let opts = HMatrixOptions::default();
    let partition = PartitionOptions::default().with_leaf_size(64).with_depth(4);

    for &n in &[512, 1024] {
        group.bench_with_input(BenchmarkId::new("hierarchical", n), &n, |b, &n| {
            b.iter(|| HierarchicalBlock::from_fn(&kernel, n, n, &partition, &opts).unwrap());
        });
        group.bench_with_input(BenchmarkId::new("uniform", n), &n, |b, &n| {
            b.iter(|| UniformBlock::from_fn(&kernel, n, n, &partition, &opts).unwrap());
        });
    }

    group.finish();
}

criterion_group!(benches, bench_lu, bench_construction);
criterion_main!(benches);
