use serde::{Deserialize, Serialize};

/// Conversion factor from weight units to virtual bytes.
///
/// A virtual byte (vB) is defined as weight / 4.
pub const WU_PER_VBYTE: u64 = 4;

/// Satoshis in one bitcoin.
pub const COIN: u64 = 100_000_000;

/// Minimal fee/weight description of a transaction.
///
/// `inputs` and `outputs` are the summed input and output values in satoshis,
/// so the fee paid to the miner is their difference. Coinbase transactions
/// carry `inputs == outputs` since they spend nothing.
///
/// # Example
/// ```
/// use mempool_flow::TransactionSummary;
///
/// let summary = TransactionSummary::new("ab".repeat(32), 400, 11_000, 10_000);
/// assert_eq!(summary.fee(), 1_000);
/// assert_eq!(summary.fee_rate(), Some(10)); // 1000 * 4 / 400
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionSummary {
    pub txid: String,

    /// Transaction weight in weight units (WU)
    pub weight: u64,

    /// Sum of the inputs in satoshis
    pub inputs: u64,

    /// Sum of the outputs in satoshis
    pub outputs: u64,
}

impl TransactionSummary {
    pub fn new(txid: impl Into<String>, weight: u64, inputs: u64, outputs: u64) -> Self {
        Self {
            txid: txid.into(),
            weight,
            inputs,
            outputs,
        }
    }

    /// Summary of a coinbase transaction: the fee is zero by convention.
    pub fn coinbase(txid: impl Into<String>, weight: u64, outputs: u64) -> Self {
        Self::new(txid, weight, outputs, outputs)
    }

    /// Total fee paid to the miner in satoshis.
    pub fn fee(&self) -> i64 {
        self.inputs as i64 - self.outputs as i64
    }

    /// Fee rate in sat/vB, truncated towards zero.
    ///
    /// Negative fees report 0. Returns `None` for a zero-weight summary.
    pub fn fee_rate(&self) -> Option<u64> {
        to_fee_rate(self.fee(), self.weight)
    }
}

/// Computes a fee rate in sat/vB from a fee in satoshis and a weight in WU.
///
/// Sat/vB is used rather than sat/WU for the extra granularity.
pub fn to_fee_rate(fee: i64, weight: u64) -> Option<u64> {
    if weight == 0 {
        return None;
    }
    let rate = (fee as i128 * WU_PER_VBYTE as i128) / weight as i128;
    Some(rate.clamp(0, u64::MAX as i128) as u64)
}
