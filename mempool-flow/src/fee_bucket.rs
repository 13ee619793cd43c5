use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{FlowError, Result};

/// Lowest fee rate (sat/vB) a bucket key can hold.
pub const MIN_FEE_RATE: u64 = 1;

/// Highest fee rate (sat/vB) a bucket key can hold.
pub const MAX_FEE_RATE: u64 = 10_000;

/// Coerces a fee rate into `[MIN_FEE_RATE, MAX_FEE_RATE]`.
pub fn clamp_fee_rate(fee_rate: u64) -> u64 {
    fee_rate.clamp(MIN_FEE_RATE, MAX_FEE_RATE)
}

/// Sparse mapping from fee rate (sat/vB) to accumulated weight.
///
/// A bucket is used both for absolute weights (the weight currently sitting in
/// the mempool) and for rates (weight per minute entering the mempool), which
/// is why values are kept as `f64`.
///
/// Every key is clamped with [`clamp_fee_rate`] before it is read or written,
/// and only strictly positive weights are stored: writing zero removes the key.
///
/// # Example
/// ```
/// use mempool_flow::FeeBucket;
///
/// let mut bucket = FeeBucket::new();
/// bucket.add(5, 1_000.0);
/// bucket.add(20, 500.0);
///
/// assert_eq!(bucket.get(5), 1_000.0);
/// assert_eq!(bucket.aggregate_sup(10), 500.0);
/// assert_eq!(bucket.max_fee_rate(), 20);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<u64, f64>", into = "BTreeMap<u64, f64>")]
pub struct FeeBucket {
    weights: BTreeMap<u64, f64>,
}

impl FeeBucket {
    /// Creates an empty bucket.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the weight stored at `fee_rate`, or 0 if there is none.
    pub fn get(&self, fee_rate: u64) -> f64 {
        self.weights
            .get(&clamp_fee_rate(fee_rate))
            .copied()
            .unwrap_or(0.0)
    }

    /// Returns true if `fee_rate` holds a positive weight.
    pub fn contains(&self, fee_rate: u64) -> bool {
        self.weights
            .get(&clamp_fee_rate(fee_rate))
            .is_some_and(|&weight| weight > 0.0)
    }

    /// Overwrites the weight at `fee_rate`. Non-positive weights remove the key.
    pub fn set(&mut self, fee_rate: u64, weight: f64) {
        let fee_rate = clamp_fee_rate(fee_rate);
        if weight > 0.0 {
            self.weights.insert(fee_rate, weight);
        } else {
            self.weights.remove(&fee_rate);
        }
    }

    /// Adds `weight` to the value at `fee_rate`.
    pub fn add(&mut self, fee_rate: u64, weight: f64) {
        let current = self.get(fee_rate);
        self.set(fee_rate, current + weight);
    }

    /// Divides every value by `factor` in place.
    ///
    /// Used to turn a weight accumulated over some interval into a rate.
    pub fn divide(&mut self, factor: f64) -> Result<()> {
        if !factor.is_finite() || factor <= 0.0 {
            return Err(FlowError::invalid_parameter(format!(
                "bucket divisor must be positive and finite, got {factor}"
            )));
        }

        for weight in self.weights.values_mut() {
            *weight /= factor;
        }
        self.weights.retain(|_, weight| *weight > 0.0);

        Ok(())
    }

    /// Adds every value of `other` into this bucket.
    pub fn merge(&mut self, other: &FeeBucket) {
        for (&fee_rate, &weight) in &other.weights {
            self.add(fee_rate, weight);
        }
    }

    /// Sum of all values.
    pub fn sum(&self) -> f64 {
        self.weights.values().sum()
    }

    /// Sum of the values whose fee rate is greater than or equal to `threshold`.
    pub fn aggregate_sup(&self, threshold: u64) -> f64 {
        self.weights
            .range(clamp_fee_rate(threshold)..)
            .map(|(_, weight)| weight)
            .sum()
    }

    /// Highest fee rate holding a positive weight, or 0 for an empty bucket.
    pub fn max_fee_rate(&self) -> u64 {
        self.weights.keys().next_back().copied().unwrap_or(0)
    }

    /// Fee rates with a positive weight, lowest first.
    pub fn ascending_keys(&self) -> Vec<u64> {
        self.weights.keys().copied().collect()
    }

    /// Fee rates with a positive weight, highest first.
    pub fn descending_keys(&self) -> Vec<u64> {
        self.weights.keys().rev().copied().collect()
    }

    /// Iterates over `(fee_rate, weight)` pairs in ascending fee rate order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, f64)> + '_ {
        self.weights.iter().map(|(&fee_rate, &weight)| (fee_rate, weight))
    }

    /// Number of fee rates holding a positive weight.
    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
}

impl From<BTreeMap<u64, f64>> for FeeBucket {
    fn from(weights: BTreeMap<u64, f64>) -> Self {
        weights.into_iter().collect()
    }
}

impl From<FeeBucket> for BTreeMap<u64, f64> {
    fn from(bucket: FeeBucket) -> Self {
        bucket.weights
    }
}

impl FromIterator<(u64, f64)> for FeeBucket {
    fn from_iter<I: IntoIterator<Item = (u64, f64)>>(iter: I) -> Self {
        let mut bucket = FeeBucket::new();
        for (fee_rate, weight) in iter {
            bucket.add(fee_rate, weight);
        }
        bucket
    }
}

impl fmt::Display for FeeBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (fee_rate, weight)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{fee_rate}={weight}")?;
        }
        Ok(())
    }
}
