use statrs::distribution::{DiscreteCDF, Poisson};
use std::collections::BTreeMap;

use crate::error::{FlowError, Result};
use crate::estimate_table::EstimateTable;
use crate::fee_bucket::FeeBucket;

/// Returns the minimum number of blocks expected after `minutes` with
/// probability `confidence`: the smallest `k` such that
/// `P(Poisson(minutes / block_interval_minutes) > k) < confidence`.
///
/// Higher confidence assumes worse block luck, so it never returns more
/// blocks than a lower confidence does.
pub fn min_expected_blocks(
    minutes: f64,
    confidence: f64,
    block_interval_minutes: f64,
) -> Result<u64> {
    if !(confidence > 0.0 && confidence <= 1.0) {
        return Err(FlowError::invalid_parameter(format!(
            "confidence must be in (0, 1], got {confidence}"
        )));
    }

    let mean = minutes / block_interval_minutes;
    let poisson = Poisson::new(mean).map_err(|e| {
        FlowError::invalid_parameter(format!("no block distribution for mean {mean}: {e}"))
    })?;

    // P(X > 0) is below 1 for any finite mean, but 1 - cdf rounds to 1.0 for long windows
    if confidence >= 1.0 {
        return Ok(0);
    }

    let mut blocks = 0u64;
    // P(X > k) only shrinks with k and reaches 0.0 in floating point, so this terminates
    while 1.0 - poisson.cdf(blocks) >= confidence {
        blocks += 1;
    }

    Ok(blocks)
}

/// Core implementation of the bucket-drain simulation.
///
/// For each window and confidence level it looks for the lowest fee rate
/// whose competing weight (what sits in the mempool at or above that rate,
/// plus what flows in during the window) is cleared by the blocks expected
/// at that confidence.
pub(crate) struct FeeCalculator {
    windows: Vec<u32>,
    confidences: Vec<f64>,
    block_capacity_wu: f64,
    /// `expected_blocks[window_idx][confidence_idx]`
    expected_blocks: Vec<Vec<u64>>,
}

impl FeeCalculator {
    /// Creates a calculator, precomputing expected block counts for every
    /// window and confidence pair.
    pub fn new(
        windows: Vec<u32>,
        confidences: Vec<f64>,
        block_capacity_wu: f64,
        block_interval_minutes: f64,
    ) -> Result<Self> {
        let expected_blocks = windows
            .iter()
            .map(|&minutes| {
                confidences
                    .iter()
                    .map(|&confidence| {
                        min_expected_blocks(minutes as f64, confidence, block_interval_minutes)
                    })
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            windows,
            confidences,
            block_capacity_wu,
            expected_blocks,
        })
    }

    /// Calculates the corrected estimate table.
    ///
    /// # Arguments
    /// * `mempool` - Weight currently waiting in the mempool
    /// * `flows` - Incoming weight per minute, one bucket per window
    pub fn get_fee_estimates(
        &self,
        mempool: &FeeBucket,
        flows: &BTreeMap<u32, FeeBucket>,
    ) -> Result<EstimateTable> {
        let window_flows = self
            .windows
            .iter()
            .map(|minutes| {
                flows.get(minutes).ok_or_else(|| {
                    FlowError::insufficient_data(format!(
                        "no flow bucket for {minutes} minute window"
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        // Highest non-empty fee rate across the mempool and every flow
        let max_fee_rate = window_flows
            .iter()
            .map(|flow| flow.max_fee_rate())
            .chain(std::iter::once(mempool.max_fee_rate()))
            .max()
            .unwrap_or(0);

        let mut table = EstimateTable::new();

        for (window_idx, (&minutes, flow)) in self.windows.iter().zip(&window_flows).enumerate() {
            for (confidence_idx, &confidence) in self.confidences.iter().enumerate() {
                let expected_blocks = self.expected_blocks[window_idx][confidence_idx];
                let fee_rate =
                    self.find_min_fee_rate(mempool, flow, minutes, expected_blocks, max_fee_rate);
                table.insert(minutes, confidence, fee_rate);
            }
        }

        table.apply_decreasing_correction();

        Ok(table)
    }

    /// Walks fee rates upwards from 1 and returns the first one that empties
    /// the bucket, or `None` if none up to `max_fee_rate + 1` does.
    fn find_min_fee_rate(
        &self,
        mempool: &FeeBucket,
        flow: &FeeBucket,
        minutes: u32,
        expected_blocks: u64,
        max_fee_rate: u64,
    ) -> Option<u64> {
        (1..=max_fee_rate + 1).find(|&fee_rate| {
            self.bucket_empties(
                minutes,
                expected_blocks,
                mempool.aggregate_sup(fee_rate),
                flow.aggregate_sup(fee_rate),
            )
        })
    }

    /// Simulates one bucket over the window.
    ///
    /// Starting from `start_weight`, the bucket gains `weight_per_minute`
    /// every minute and loses one block's capacity per expected block.
    /// Returns true if it ends up empty.
    fn bucket_empties(
        &self,
        minutes: u32,
        expected_blocks: u64,
        start_weight: f64,
        weight_per_minute: f64,
    ) -> bool {
        let weight_added = weight_per_minute * minutes as f64;
        let weight_removed = self.block_capacity_wu * expected_blocks as f64;

        start_weight + weight_added - weight_removed <= 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOCK_CAPACITY: f64 = 4_000_000.0;

    fn calculator(windows: Vec<u32>, confidences: Vec<f64>) -> FeeCalculator {
        FeeCalculator::new(windows, confidences, BLOCK_CAPACITY, 10.0).unwrap()
    }

    #[test]
    fn test_min_expected_blocks() {
        // Poisson(6): P(X > 5) = 0.554, P(X > 6) = 0.394
        assert_eq!(min_expected_blocks(60.0, 0.5, 10.0).unwrap(), 6);
        // Poisson(3): P(X > 0) = 0.950, P(X > 1) = 0.801, P(X > 2) = 0.577, P(X > 3) = 0.353
        assert_eq!(min_expected_blocks(30.0, 0.9, 10.0).unwrap(), 1);
        assert_eq!(min_expected_blocks(30.0, 0.5, 10.0).unwrap(), 3);
    }

    #[test]
    fn test_full_confidence_expects_no_blocks() {
        for minutes in [10.0, 30.0, 180.0, 1440.0] {
            assert_eq!(min_expected_blocks(minutes, 1.0, 10.0).unwrap(), 0);
        }
    }

    #[test]
    fn test_min_expected_blocks_rejects_bad_input() {
        assert!(min_expected_blocks(30.0, 0.0, 10.0).is_err());
        assert!(min_expected_blocks(30.0, 1.5, 10.0).is_err());
        assert!(min_expected_blocks(0.0, 0.5, 10.0).is_err());
    }

    #[test]
    fn test_bucket_empties() {
        let calc = calculator(vec![60], vec![0.5]);

        assert!(calc.bucket_empties(60, 1, 4_000_000.0, 0.0));
        assert!(!calc.bucket_empties(60, 1, 4_000_001.0, 0.0));
        // 2 blocks clear 8M, inflow adds 60 * 100_000 = 6M
        assert!(calc.bucket_empties(60, 2, 2_000_000.0, 100_000.0));
        assert!(!calc.bucket_empties(60, 2, 2_000_001.0, 100_000.0));
        assert!(calc.bucket_empties(60, 0, 0.0, 0.0));
    }

    #[test]
    fn test_find_min_fee_rate_picks_cutoff() {
        let calc = calculator(vec![10], vec![0.5]);
        // One block clears 4M: everything at 20 and above fits, 10 and below does not
        let mempool: FeeBucket = [(10, 3_000_000.0), (20, 2_000_000.0), (30, 2_000_000.0)]
            .into_iter()
            .collect();
        let flow = FeeBucket::new();

        assert_eq!(calc.find_min_fee_rate(&mempool, &flow, 10, 1, 30), Some(11));
        // Nothing can be cleared without a block except above the top rate
        assert_eq!(calc.find_min_fee_rate(&mempool, &flow, 10, 0, 30), Some(31));
    }

    #[test]
    fn test_undefined_when_top_bucket_overflows() {
        let calc = calculator(vec![10], vec![0.5]);
        let mempool: FeeBucket = [(crate::MAX_FEE_RATE, 9_000_000.0)].into_iter().collect();
        let flows = BTreeMap::from([(10, FeeBucket::new())]);

        let table = calc.get_fee_estimates(&mempool, &flows).unwrap();
        assert_eq!(table.get(10, 0.5), Some(None));
    }

    #[test]
    fn test_missing_flow_is_an_error() {
        let calc = calculator(vec![30, 60], vec![0.5]);
        let flows = BTreeMap::from([(30, FeeBucket::new())]);

        assert!(calc.get_fee_estimates(&FeeBucket::new(), &flows).is_err());
    }

    #[test]
    fn test_empty_inputs_give_minimum_fee() {
        let calc = calculator(vec![30, 60], vec![0.5, 0.9]);
        let flows = BTreeMap::from([(30, FeeBucket::new()), (60, FeeBucket::new())]);

        let table = calc.get_fee_estimates(&FeeBucket::new(), &flows).unwrap();
        for window in [30, 60] {
            for confidence in [0.5, 0.9] {
                assert_eq!(table.get_fee_rate(window, confidence), Some(1));
            }
        }
    }
}
