use criterion::{black_box, criterion_group, criterion_main, Criterion};
use georank::algorithms::{influence, LatentFactorStore, ScoringService};
use georank::geo::{self, GeoNeighborIndex};
use georank::models::Poi;
use georank::utils::worker_pool;

fn synthetic_pois(n: usize) -> Vec<Poi> {
    (0..n)
        .map(|i| {
            let row = (i / 20) as f64;
            let col = (i % 20) as f64;
            Poi::new(i as u32, 40.0 + row * 0.01, -74.0 + col * 0.01)
        })
        .collect()
}

fn benchmark_neighbor_index(c: &mut Criterion) {
    let pool = worker_pool().unwrap();
    let pois = synthetic_pois(400);

    c.bench_function("neighbor_index_build_400", |b| {
        b.iter(|| black_box(GeoNeighborIndex::build(&pois, 50, &pool).unwrap()));
    });
}

fn benchmark_scoring(c: &mut Criterion) {
    let pool = worker_pool().unwrap();
    let pois = synthetic_pois(400);
    let index = GeoNeighborIndex::build(&pois, 50, &pool).unwrap();
    let weights = geo::weight_matrix(&index, 16, &pool).unwrap();
    let mut factors = LatentFactorStore::initialize(100, 400, 16, 34);
    let snapshot = influence::rebuild(&mut factors, &index, &weights, 0.2, &pool);

    c.bench_function("influence_rebuild_400x16", |b| {
        b.iter(|| {
            black_box(influence::rebuild(
                &mut factors,
                &index,
                &weights,
                0.2,
                &pool,
            ))
        });
    });

    c.bench_function("predict_single_pair", |b| {
        let scorer = ScoringService::new(&factors, &snapshot);
        b.iter(|| black_box(scorer.predict(42, 123).unwrap()));
    });
}

criterion_group!(benches, benchmark_neighbor_index, benchmark_scoring);
criterion_main!(benches);
