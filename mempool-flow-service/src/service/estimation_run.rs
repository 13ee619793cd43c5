use mempool_flow::{FeeBucket, FeeEstimates, FlowError, FlowEstimator, TransactionSummary};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use super::summary_engine::{EngineError, SummaryEngine};
use crate::bitcoin::{NodeRpc, RpcError};
use crate::persistence::{HistoryStore, PersistenceError, TxLogStore};

/// Estimation run errors
#[derive(Error, Debug)]
pub enum RunError {
    #[error("Summary engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("Estimation error: {0}")]
    Estimation(#[from] FlowError),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Document produced by one run, persisted to history and optionally to a file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutput {
    /// Unix time of the run in seconds
    pub timestamp: i64,
    pub estimates: FeeEstimates,
    /// Flow in WU/minute, keyed by the span it was measured over in minutes
    pub flow: BTreeMap<u32, FeeBucket>,
    pub mempool: FeeBucket,
}

impl RunOutput {
    /// Writes the document as JSON to `path`
    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<(), RunError> {
        let json = serde_json::to_string(self)?;
        std::fs::write(path.as_ref(), json)?;
        debug!("Wrote estimates to {}", path.as_ref().display());
        Ok(())
    }
}

/// One complete estimation: trim the log, measure inflow per window, load the
/// mempool, estimate and record the result.
pub struct EstimationRun {
    engine: SummaryEngine,
    node: Arc<dyn NodeRpc>,
    tx_log: Arc<dyn TxLogStore>,
    history: Arc<dyn HistoryStore>,
    estimator: FlowEstimator,
    flow_timespan_multiplier: u32,
}

impl EstimationRun {
    pub fn new(
        engine: SummaryEngine,
        node: Arc<dyn NodeRpc>,
        tx_log: Arc<dyn TxLogStore>,
        history: Arc<dyn HistoryStore>,
        estimator: FlowEstimator,
        flow_timespan_multiplier: u32,
    ) -> Self {
        Self {
            engine,
            node,
            tx_log,
            history,
            estimator,
            flow_timespan_multiplier: flow_timespan_multiplier.max(1),
        }
    }

    /// Seconds of log used to measure the flow of a window
    fn span_secs(&self, window: u32) -> i64 {
        i64::from(window) * 60 * i64::from(self.flow_timespan_multiplier)
    }

    pub async fn execute(&self, now: i64) -> Result<RunOutput, RunError> {
        let widest_span = self
            .estimator
            .windows()
            .iter()
            .map(|&window| self.span_secs(window))
            .max()
            .unwrap_or(0);

        // Keep twice the widest span in the log
        let trimmed = self.tx_log.trim_log(now - widest_span * 2).await?;
        info!(
            "Trimmed {} transactions older than {} days",
            trimmed,
            (widest_span * 2) as f64 / 86_400.0
        );

        let flows = self.load_flows(now, widest_span).await?;
        let mempool = self.load_mempool().await?;

        let estimates = self.estimator.compute_estimates(&mempool, &flows)?;

        let output = RunOutput {
            timestamp: now,
            estimates,
            flow: flows
                .into_iter()
                .map(|(window, bucket)| (window * self.flow_timespan_multiplier, bucket))
                .collect(),
            mempool,
        };

        self.history
            .insert_history(now, &serde_json::to_value(&output)?)
            .await?;

        info!("Estimation run complete");
        Ok(output)
    }

    /// Reads the log once for the widest span and derives every window's flow from it
    async fn load_flows(
        &self,
        now: i64,
        widest_span: i64,
    ) -> Result<BTreeMap<u32, FeeBucket>, RunError> {
        let entries = self.tx_log.fetch_log(now - widest_span).await?;
        info!(
            "Loaded {} transactions seen over the last {:.1} hours",
            entries.len(),
            widest_span as f64 / 3_600.0
        );

        let txids: Vec<String> = entries.iter().map(|entry| entry.txid.clone()).collect();
        let summaries = self.engine.process(&txids).await?;

        let mut flows = BTreeMap::new();
        for &window in self.estimator.windows() {
            let span = self.span_secs(window);
            let since = now - span;

            let seen = entries
                .iter()
                .filter(|entry| entry.time >= since)
                .map(|entry| &entry.txid);
            let mut flow = fold_into_bucket(seen, &summaries);
            flow.divide(span as f64 / 60.0)?;

            debug!("Flow for {} minute window: {} WU/min", window, flow.sum());
            flows.insert(window, flow);
        }

        Ok(flows)
    }

    async fn load_mempool(&self) -> Result<FeeBucket, RunError> {
        let txids = self.node.get_raw_mempool().await?;
        info!("Loading {} mempool transactions", txids.len());

        let summaries = self.engine.process(&txids).await?;
        Ok(fold_into_bucket(txids.iter(), &summaries))
    }
}

/// Adds the weight of every summarized transaction to the bucket of its fee rate
pub fn fold_into_bucket<'a>(
    txids: impl IntoIterator<Item = &'a String>,
    summaries: &HashMap<String, Option<TransactionSummary>>,
) -> FeeBucket {
    let mut bucket = FeeBucket::new();

    for txid in txids {
        match summaries.get(txid) {
            Some(Some(summary)) => {
                if let Some(fee_rate) = summary.fee_rate() {
                    bucket.add(fee_rate, summary.weight as f64);
                }
            }
            Some(None) => {}
            None => debug!("Summary not found: {}", txid),
        }
    }

    bucket
}
