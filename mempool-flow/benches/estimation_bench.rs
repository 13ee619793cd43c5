use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use mempool_flow::{FeeBucket, FlowEstimator};
use std::collections::BTreeMap;

/// Generate a mempool bucket spread over `num_fee_rates` distinct fee rates
fn generate_mempool(num_fee_rates: u64) -> FeeBucket {
    (1..=num_fee_rates)
        .map(|fee_rate| (fee_rate, 50_000.0 + (fee_rate % 17) as f64 * 10_000.0))
        .collect()
}

/// Generate one flow bucket per default window
fn generate_flows(num_fee_rates: u64) -> BTreeMap<u32, FeeBucket> {
    FlowEstimator::DEFAULT_WINDOWS_MINUTES
        .iter()
        .map(|&window| {
            let flow = (1..=num_fee_rates)
                .map(|fee_rate| (fee_rate, 100.0 + (fee_rate % 7) as f64 * 25.0))
                .collect();
            (window, flow)
        })
        .collect()
}

fn benchmark_estimation(c: &mut Criterion) {
    let mut group = c.benchmark_group("estimation");
    let estimator = FlowEstimator::new();

    for num_fee_rates in [10u64, 100, 1_000, 10_000].iter() {
        let mempool = generate_mempool(*num_fee_rates);
        let flows = generate_flows(*num_fee_rates);

        group.bench_with_input(
            BenchmarkId::new("compute_estimates", num_fee_rates),
            num_fee_rates,
            |b, _| b.iter(|| estimator.compute_estimates(&mempool, &flows)),
        );
    }

    group.finish();
}

fn benchmark_bucket_ops(c: &mut Criterion) {
    let mempool = generate_mempool(10_000);

    c.bench_function("aggregate_sup_sweep", |b| {
        b.iter(|| (1..=10_000u64).map(|r| mempool.aggregate_sup(r)).sum::<f64>())
    });
}

criterion_group!(benches, benchmark_estimation, benchmark_bucket_ops);
criterion_main!(benches);
