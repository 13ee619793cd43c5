#![no_main]

use libfuzzer_sys::fuzz_target;
use mempool_flow::{FeeBucket, FlowEstimator, TransactionSummary};
use std::collections::BTreeMap;

fuzz_target!(|data: &[u8]| {
    if data.len() < 16 {
        return;
    }

    let estimator = FlowEstimator::new();
    let mut mempool = FeeBucket::new();
    let mut flow = FeeBucket::new();

    // Each 16 byte chunk is a transaction: weight, input value, output value, target bucket
    for (i, chunk) in data.chunks_exact(16).take(10_000).enumerate() {
        let weight =
            u64::from(u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])) % 4_000_000;
        let inputs = u64::from_le_bytes([
            chunk[4], chunk[5], chunk[6], chunk[7], chunk[8], chunk[9], chunk[10], chunk[11],
        ]) % 2_100_000_000_000_000;
        let outputs = u64::from(u32::from_le_bytes([chunk[12], chunk[13], chunk[14], chunk[15]]));

        let summary = TransactionSummary::new(format!("tx{i}"), weight, inputs, outputs);
        let Some(fee_rate) = summary.fee_rate() else {
            continue;
        };

        if i % 2 == 0 {
            mempool.add(fee_rate, weight as f64);
        } else {
            flow.add(fee_rate, weight as f64 / 60.0);
        }
    }

    let flows: BTreeMap<u32, FeeBucket> = estimator
        .windows()
        .iter()
        .map(|&window| (window, flow.clone()))
        .collect();

    // Never panics, whatever the buckets hold
    if let Ok(estimates) = estimator.compute_estimates(&mempool, &flows) {
        let _ = serde_json::to_string(&estimates);
    }
});
