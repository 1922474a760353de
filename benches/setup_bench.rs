use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use weno_stencil::algs::communicator::NoComm;
use weno_stencil::config::{MatrixCacheConfig, ReconstructionConfig, SplitPolicy};
use weno_stencil::evaluator::{HaloValues, ReconstructionEvaluator};
use weno_stencil::matrix::MatrixCache;
use weno_stencil::mesh::{MeshProvider, hex_box};
use weno_stencil::reconstruction::ReconstructionScheme;

fn config(order: usize) -> ReconstructionConfig {
    ReconstructionConfig {
        polynomial_order: order,
        split: SplitPolicy::Never,
        ..Default::default()
    }
}

fn bench_setup(c: &mut Criterion) {
    let mut group = c.benchmark_group("setup");
    group.sample_size(10);
    let mesh = hex_box([8, 8, 8], [0.0; 3], [1.0; 3]).expect("mesh");

    for order in [1usize, 2] {
        let cfg = config(order);
        group.bench_with_input(BenchmarkId::new("hex_box_8", order), &order, |b, _| {
            b.iter(|| {
                let scheme = ReconstructionScheme::setup(&mesh, &cfg, &NoComm).expect("setup");
                black_box(scheme.matrix_stats());
            });
        });
    }
    group.finish();
}

fn bench_face_corrections(c: &mut Criterion) {
    let mesh = hex_box([8, 8, 8], [0.0; 3], [1.0; 3]).expect("mesh");
    let scheme = ReconstructionScheme::setup(&mesh, &config(2), &NoComm).expect("setup");
    let values: Vec<f64> = (0..mesh.n_cells())
        .map(|c| {
            let p = mesh.cell_centroid(c);
            (p.x * 3.0).sin() + p.y * p.z
        })
        .collect();
    let eval = ReconstructionEvaluator::new(&scheme);
    let halo = HaloValues::default();

    c.bench_function("face_corrections/hex_box_8", |b| {
        b.iter(|| black_box(eval.face_corrections(&values, &halo).expect("corrections")));
    });
}

fn bench_intern(c: &mut Criterion) {
    let mesh = hex_box([6, 6, 6], [0.0; 3], [1.0; 3]).expect("mesh");
    let scheme = ReconstructionScheme::setup(&mesh, &config(2), &NoComm).expect("setup");
    let matrices: Vec<_> = (0..mesh.n_cells())
        .filter_map(|c| scheme.pseudo_inverse(c, 0).cloned())
        .collect();

    c.bench_function("matrix_cache/intern", |b| {
        b.iter(|| {
            let mut cache = MatrixCache::new(MatrixCacheConfig::default());
            for m in &matrices {
                black_box(cache.intern(m.clone()));
            }
            black_box(cache.stats());
        });
    });
}

criterion_group!(benches, bench_setup, bench_face_corrections, bench_intern);
criterion_main!(benches);
