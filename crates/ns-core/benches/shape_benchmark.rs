use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use ns_core::{ParamView, ShapeDescriptor, Shaped};
use std::hint::black_box;

fn named_output(n: usize) -> Shaped<f64> {
    Shaped::named((0..n).map(|i| {
        let v = if i % 2 == 0 { Shaped::Scalar(i as f64) } else { Shaped::vector(vec![i as f64; 4]) };
        (format!("k{i}"), v)
    }))
}

fn bench_flatten_restore(c: &mut Criterion) {
    let mut group = c.benchmark_group("shape_named");

    for n in [4usize, 16, 64] {
        let value = named_output(n);
        let layout = ShapeDescriptor::of(&value).unwrap();
        let mut buf = vec![0.0; layout.size()];

        group.bench_with_input(BenchmarkId::new("flatten_into", n), &n, |b, _| {
            b.iter(|| {
                layout.flatten_into(black_box(&value), &mut buf).unwrap();
                black_box(buf[0])
            })
        });

        group.bench_with_input(BenchmarkId::new("restore", n), &n, |b, _| {
            b.iter(|| black_box(layout.restore(black_box(buf.clone())).unwrap()))
        });
    }

    group.finish();
}

fn bench_param_view(c: &mut Criterion) {
    let layout = ShapeDescriptor::Named(vec![
        ("log(a)".to_string(), vec![]),
        ("b".to_string(), vec![8]),
        ("sqrt(c)".to_string(), vec![4]),
    ]);
    let mut view = ParamView::new(layout, true);
    let p: Vec<f64> = (0..13).map(|i| i as f64 * 0.1).collect();

    c.bench_function("param_view_set_flat_extended", |b| {
        b.iter(|| {
            view.set_flat(black_box(&p));
            black_box(view.get_scalar("a"))
        })
    });
}

criterion_group!(benches, bench_flatten_restore, bench_param_view);
criterion_main!(benches);
