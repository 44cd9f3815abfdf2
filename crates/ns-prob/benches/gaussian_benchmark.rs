use criterion::{Criterion, criterion_group, criterion_main};
use nalgebra::DMatrix;
use ns_core::ShapeDescriptor;
use ns_core::traits::Distribution;
use ns_prob::{Bijector, GaussianDistribution, TangentBijector};
use std::hint::black_box;

fn bench_whitening(c: &mut Criterion) {
    let n = 16;
    let cov = DMatrix::from_fn(n, n, |i, j| if i == j { 1.0 } else { 0.3 });
    let g = GaussianDistribution::new(vec![0.0; n], cov, ShapeDescriptor::Array(vec![n]), Some(1e-15))
        .unwrap();
    let x: Vec<f64> = (0..n).map(|i| (i as f64) * 0.1 - 0.8).collect();
    let mut dp = vec![0.0; n];

    c.bench_function("gaussian_x_to_dp_16", |b| {
        b.iter(|| {
            g.x_to_dp(black_box(&x), &mut dp);
            black_box(dp[0])
        })
    });

    c.bench_function("gaussian_density_16", |b| b.iter(|| black_box(g.density(black_box(&x)))));
}

fn bench_tangent(c: &mut Criterion) {
    let t = TangentBijector::new(1.0);
    let thetas: Vec<f64> = (0..10_000).map(|i| (i as f64) * 1.5e-4 - 0.75).collect();

    c.bench_function("tangent_forward_jacobian_10k", |b| {
        b.iter(|| {
            let mut acc = 0.0;
            for &th in &thetas {
                let (x, j) = t.forward_with_jacobian(th);
                acc += x * j;
            }
            black_box(acc)
        })
    });

    c.bench_function("tangent_log_jacobian_10k", |b| {
        b.iter(|| {
            let mut acc = 0.0;
            for &th in &thetas {
                acc += t.log_abs_det_jacobian(th);
            }
            black_box(acc)
        })
    });
}

criterion_group!(benches, bench_whitening, bench_tangent);
criterion_main!(benches);
