use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use loghist::Histogram;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256StarStar;

fn get_uniform_values(len: usize, limit: u64) -> Vec<u64> {
    // Seeded RNG so every run benchmarks the same data.
    let mut rng = Xoshiro256StarStar::seed_from_u64(len as u64);
    (0..len).map(|_| rng.gen_range(0..limit)).collect()
}

fn record_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("record");
    group.throughput(Throughput::Elements(1));

    group.bench_function("hot bucket", |b| {
        let histogram = Histogram::new(5).unwrap();
        b.iter(|| histogram.increment(black_box(42)));
    });

    group.bench_function("uniform spread", |b| {
        let histogram = Histogram::new(5).unwrap();
        let values = get_uniform_values(16_384, 1_000_000_000);
        let mut index = 0;
        b.iter(|| {
            histogram.increment(values[index & 16_383]);
            index += 1;
        });
    });

    group.bench_function("uniform spread, high precision", |b| {
        let histogram = Histogram::new(12).unwrap();
        let values = get_uniform_values(16_384, 1_000_000_000);
        let mut index = 0;
        b.iter(|| {
            histogram.increment(values[index & 16_383]);
            index += 1;
        });
    });

    group.finish();
}

fn query_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("query");

    let histogram = Histogram::new(5).unwrap();
    for value in get_uniform_values(1_000_000, 1_000_000_000) {
        histogram.increment(value);
    }

    group.bench_function("snapshot", |b| b.iter(|| histogram.snapshot()));

    let snapshot = histogram.snapshot();
    group.bench_function("value_at_quantile", |b| {
        b.iter(|| snapshot.value_at_quantile(black_box(0.99)))
    });
    group.bench_function("rank_of_value", |b| {
        b.iter(|| snapshot.rank_of_value(black_box(900_000_000)))
    });
    group.bench_function("mean_variance", |b| b.iter(|| histogram.mean_variance()));

    group.finish();
}

criterion_group!(benches, record_benchmark, query_benchmark);
criterion_main!(benches);
