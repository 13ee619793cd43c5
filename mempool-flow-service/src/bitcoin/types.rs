use mempool_flow::COIN;
use serde::{Deserialize, Serialize};

/// Verbose `getrawtransaction` result, restricted to the fields used for summaries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTransaction {
    pub txid: String,
    pub weight: u64,
    pub vin: Vec<TxInput>,
    pub vout: Vec<TxOutput>,
}

/// Transaction input; coinbase inputs carry no previous-output reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vout: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coinbase: Option<String>,
}

/// Transaction output, value in BTC as reported by the node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxOutput {
    pub value: f64,
}

/// Entry of the verbose `getrawmempool` result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MempoolEntry {
    /// Unix time the node first saw the transaction
    pub time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<u64>,
}

impl RawTransaction {
    pub fn new(
        txid: impl Into<String>,
        weight: u64,
        vin: Vec<TxInput>,
        vout: Vec<TxOutput>,
    ) -> Self {
        Self {
            txid: txid.into(),
            weight,
            vin,
            vout,
        }
    }

    /// Only the first input is inspected, matching how nodes report coinbase inputs.
    /// Returns `None` when there are no inputs at all.
    pub fn is_coinbase(&self) -> Option<bool> {
        self.vin.first().map(TxInput::is_coinbase)
    }

    /// Sum of all output values in satoshis
    pub fn output_value_sat(&self) -> u64 {
        self.vout.iter().map(TxOutput::value_sat).sum()
    }
}

impl TxInput {
    /// Input spending output `vout` of transaction `txid`
    pub fn spending(txid: impl Into<String>, vout: u32) -> Self {
        Self {
            txid: Some(txid.into()),
            vout: Some(vout),
            coinbase: None,
        }
    }

    pub fn coinbase(script: impl Into<String>) -> Self {
        Self {
            txid: None,
            vout: None,
            coinbase: Some(script.into()),
        }
    }

    pub fn is_coinbase(&self) -> bool {
        self.txid.is_none()
    }
}

impl TxOutput {
    pub fn new(value: f64) -> Self {
        Self { value }
    }

    /// Value in satoshis, rounded to the nearest satoshi
    pub fn value_sat(&self) -> u64 {
        btc_to_sat(self.value)
    }
}

/// Converts a BTC amount to satoshis, rounding to the nearest satoshi
pub fn btc_to_sat(value: f64) -> u64 {
    (value * COIN as f64).round() as u64
}
