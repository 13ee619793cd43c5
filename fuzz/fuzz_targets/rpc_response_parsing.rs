#![no_main]

use libfuzzer_sys::fuzz_target;
use mempool_flow::FeeEstimates;
use mempool_flow_service::bitcoin::{MempoolEntry, RawTransaction};
use mempool_flow_service::service::RunOutput;
use serde_json::Value;
use std::collections::HashMap;

// Node replies and stored history documents must decode or fail, never panic
fuzz_target!(|data: &[u8]| {
    let Ok(json) = serde_json::from_slice::<Value>(data) else {
        return;
    };

    let result = json.get("result").unwrap_or(&json);

    if let Ok(tx) = serde_json::from_value::<RawTransaction>(result.clone()) {
        let _ = tx.is_coinbase();
        let _ = tx.output_value_sat();
    }
    let _ = serde_json::from_value::<HashMap<String, MempoolEntry>>(result.clone());
    let _ = serde_json::from_value::<Vec<String>>(result.clone());

    let _ = serde_json::from_value::<FeeEstimates>(json.clone());
    let _ = serde_json::from_value::<RunOutput>(json);
});
