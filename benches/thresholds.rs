//! The three null estimators at a fixed sample size.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use mmd_twosample::{bootstrap_threshold, gamma_threshold, spectral_threshold, KernelBlocks};
use ndarray::Array2;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

fn bench_thresholds(c: &mut Criterion) {
    let m = 100;
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let x = Array2::from_shape_fn((m, 4), |_| rng.random::<f64>());
    let y = Array2::from_shape_fn((m, 4), |_| rng.random::<f64>() + 0.1);
    let blocks = KernelBlocks::rbf(x.view(), y.view(), 0.5).unwrap();

    let mut group = c.benchmark_group("null_thresholds");
    group.sample_size(10);

    group.bench_function("bootstrap_1000", |b| {
        b.iter(|| black_box(bootstrap_threshold(&blocks, 1000, 0.05, &mut rng)))
    });

    group.bench_function("gamma", |b| {
        b.iter(|| black_box(gamma_threshold(black_box(&blocks), 0.05)))
    });

    group.bench_function("spectral_1000", |b| {
        b.iter(|| black_box(spectral_threshold(&blocks, None, 1000, 0.05, &mut rng)))
    });

    group.finish();
}

criterion_group!(benches, bench_thresholds);
criterion_main!(benches);
