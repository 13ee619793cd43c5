use std::collections::BTreeMap;

use crate::{
    error::{FlowError, Result},
    estimate_table::{EstimateTable, FeeEstimates},
    fee_bucket::FeeBucket,
    internal::{fee_calculator::min_expected_blocks, FeeCalculator},
};

/// The main entry point for calculating fee estimates.
///
/// FlowEstimator models every fee rate as a bucket holding the mempool weight
/// that would be mined before it, refilled by the observed inflow and drained
/// by the blocks expected over each confirmation window.
///
/// # Example
/// ```
/// use mempool_flow::{FeeBucket, FlowEstimator};
/// use std::collections::BTreeMap;
///
/// let estimator = FlowEstimator::new();
///
/// let mut mempool = FeeBucket::new();
/// mempool.add(5, 1_000_000.0);
///
/// // Incoming weight per minute for each confirmation window
/// let flows: BTreeMap<u32, FeeBucket> = FlowEstimator::DEFAULT_WINDOWS_MINUTES
///     .iter()
///     .map(|&window| (window, FeeBucket::new()))
///     .collect();
///
/// let estimates = estimator.compute_estimates(&mempool, &flows).unwrap();
/// if let Some(fee_rate) = estimates.by_minute.get_fee_rate(60, 0.5) {
///     println!("Confirm within an hour (50%): {} sat/vB", fee_rate);
/// }
/// ```
pub struct FlowEstimator {
    windows: Vec<u32>,
    confidences: Vec<f64>,
    block_capacity_wu: f64,
    block_interval_minutes: f64,
    calculator: FeeCalculator,
}

impl FlowEstimator {
    /// Default confirmation windows in minutes (30m, 1h, 2h, 3h, 6h, 12h, 24h).
    pub const DEFAULT_WINDOWS_MINUTES: &'static [u32] = &[30, 60, 120, 180, 360, 720, 1440];

    /// Default confidence levels (50%, 80%, 90%).
    pub const DEFAULT_CONFIDENCES: &'static [f64] = &[0.5, 0.8, 0.9];

    /// Block capacity in weight units (4M WU).
    pub const BLOCK_CAPACITY_WU: f64 = 4_000_000.0;

    /// Average time between blocks in minutes.
    pub const TARGET_BLOCK_INTERVAL_MINUTES: f64 = 10.0;

    /// Creates a new FlowEstimator with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new FlowEstimator with custom settings.
    ///
    /// Windows are sorted ascending and deduplicated so the decreasing-fee
    /// correction always walks from the shortest to the longest window.
    ///
    /// # Arguments
    /// * `windows` - Confirmation windows in minutes (must be positive)
    /// * `confidences` - Confidence levels (must be in (0.0, 1.0])
    /// * `block_capacity_wu` - Weight a single block can clear
    /// * `block_interval_minutes` - Average time between blocks
    pub fn with_config(
        windows: Vec<u32>,
        confidences: Vec<f64>,
        block_capacity_wu: f64,
        block_interval_minutes: f64,
    ) -> Result<Self> {
        if windows.is_empty() {
            return Err(FlowError::invalid_config("At least one window must be provided"));
        }
        if confidences.is_empty() {
            return Err(FlowError::invalid_config(
                "At least one confidence level must be provided",
            ));
        }
        if windows.contains(&0) {
            return Err(FlowError::invalid_config("All windows must be positive"));
        }
        if confidences.iter().any(|&c| !(c > 0.0 && c <= 1.0)) {
            return Err(FlowError::invalid_config(
                "All confidence levels must be in (0.0, 1.0]",
            ));
        }
        if !(block_capacity_wu > 0.0 && block_capacity_wu.is_finite()) {
            return Err(FlowError::invalid_config("Block capacity must be positive"));
        }
        if !(block_interval_minutes > 0.0 && block_interval_minutes.is_finite()) {
            return Err(FlowError::invalid_config("Block interval must be positive"));
        }

        let mut windows = windows;
        windows.sort_unstable();
        windows.dedup();

        let calculator = FeeCalculator::new(
            windows.clone(),
            confidences.clone(),
            block_capacity_wu,
            block_interval_minutes,
        )?;

        Ok(Self {
            windows,
            confidences,
            block_capacity_wu,
            block_interval_minutes,
            calculator,
        })
    }

    /// Calculates fee estimates from the current mempool and the inflow per window.
    ///
    /// # Arguments
    /// * `mempool` - Weight currently in the mempool, by fee rate
    /// * `flows` - For every configured window, the weight per minute entering
    ///             the mempool, by fee rate
    ///
    /// # Returns
    /// Estimates by minute, plus the reserved (undefined) by-block table.
    /// Fails if a configured window has no flow bucket.
    pub fn compute_estimates(
        &self,
        mempool: &FeeBucket,
        flows: &BTreeMap<u32, FeeBucket>,
    ) -> Result<FeeEstimates> {
        let by_minute = self.calculator.get_fee_estimates(mempool, flows)?;

        Ok(FeeEstimates {
            by_minute,
            by_block: EstimateTable::undefined(&[1], &self.confidences),
        })
    }

    /// Minimum number of blocks expected within `minutes` at `confidence`.
    pub fn min_expected_blocks(&self, minutes: u32, confidence: f64) -> Result<u64> {
        min_expected_blocks(minutes as f64, confidence, self.block_interval_minutes)
    }

    /// Configured windows in ascending order.
    pub fn windows(&self) -> &[u32] {
        &self.windows
    }

    pub fn confidences(&self) -> &[f64] {
        &self.confidences
    }

    pub fn block_capacity_wu(&self) -> f64 {
        self.block_capacity_wu
    }
}

impl Default for FlowEstimator {
    fn default() -> Self {
        let windows = Self::DEFAULT_WINDOWS_MINUTES.to_vec();
        let confidences = Self::DEFAULT_CONFIDENCES.to_vec();
        let calculator = FeeCalculator::new(
            windows.clone(),
            confidences.clone(),
            Self::BLOCK_CAPACITY_WU,
            Self::TARGET_BLOCK_INTERVAL_MINUTES,
        )
        .unwrap_or_else(|e| unreachable!("default estimator settings are valid: {e}"));

        Self {
            windows,
            confidences,
            block_capacity_wu: Self::BLOCK_CAPACITY_WU,
            block_interval_minutes: Self::TARGET_BLOCK_INTERVAL_MINUTES,
            calculator,
        }
    }
}
