//! Mempool Flow - A Bitcoin fee estimation library
//!
//! This library estimates the fee rate needed to confirm a transaction within a
//! time window by treating every fee rate as a bucket: the bucket starts with
//! the mempool weight paying at least that rate, is refilled by the observed
//! inflow of new transactions, and is drained by blocks whose arrival follows
//! a Poisson process.
//!
//! # Features
//! - Sparse fee-rate buckets with clamped keys
//! - Confidence-based block expectations from a Poisson model
//! - Estimates that never increase as the confirmation window widens
//!
//! # Example
//! ```
//! use mempool_flow::{FeeBucket, FlowEstimator, TransactionSummary};
//! use std::collections::BTreeMap;
//!
//! let estimator = FlowEstimator::new();
//!
//! // Fold transaction summaries into the mempool bucket
//! let summaries = vec![
//!     TransactionSummary::new("a".repeat(64), 800, 12_000, 10_000),
//!     TransactionSummary::new("b".repeat(64), 400, 5_500, 5_000),
//! ];
//! let mut mempool = FeeBucket::new();
//! for summary in &summaries {
//!     if let Some(fee_rate) = summary.fee_rate() {
//!         mempool.add(fee_rate, summary.weight as f64);
//!     }
//! }
//!
//! // No inflow observed for any window
//! let flows: BTreeMap<u32, FeeBucket> = estimator
//!     .windows()
//!     .iter()
//!     .map(|&window| (window, FeeBucket::new()))
//!     .collect();
//!
//! let estimates = estimator.compute_estimates(&mempool, &flows).unwrap();
//! println!("{}", estimates.by_minute);
//! ```

// Public modules
pub mod error;

// Data structures
mod estimate_table;
mod fee_bucket;
mod flow_estimator;
mod transaction_summary;

// Internal implementation modules
pub(crate) mod internal;

// Public exports
pub use error::{FlowError, Result};
pub use estimate_table::{EstimateTable, FeeEstimates, OrderedFloat};
pub use fee_bucket::{clamp_fee_rate, FeeBucket, MAX_FEE_RATE, MIN_FEE_RATE};
pub use flow_estimator::FlowEstimator;
pub use internal::fee_calculator::min_expected_blocks;
pub use transaction_summary::{to_fee_rate, TransactionSummary, COIN, WU_PER_VBYTE};
