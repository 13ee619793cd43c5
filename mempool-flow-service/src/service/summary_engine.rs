use futures::future::try_join_all;
use mempool_flow::TransactionSummary;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::bitcoin::{NodeRpc, RawTransaction, RpcError};
use crate::persistence::{PersistenceError, SummaryStore};

/// Summary engine errors
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Summary store error: {0}")]
    Store(#[from] PersistenceError),

    #[error("All {attempted} summary constructions failed to reach the node: {last}")]
    Systemic { attempted: usize, last: RpcError },
}

/// Failure to build the summary of a single transaction
#[derive(Error, Debug)]
pub enum ConstructError {
    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("Transaction {0} has malformed inputs")]
    MalformedTransaction(String),

    #[error("Previous transaction {0} not found")]
    MissingPreviousTransaction(String),

    #[error("Output {vout} of transaction {txid} does not exist")]
    MissingOutput { txid: String, vout: u32 },
}

impl ConstructError {
    fn transport_error(self) -> Result<RpcError, Self> {
        match self {
            ConstructError::Rpc(e) if e.is_transport() => Ok(e),
            other => Err(other),
        }
    }
}

/// Summary engine tuning
#[derive(Debug, Clone)]
pub struct SummaryEngineConfig {
    /// Summary constructions allowed to run at once
    pub max_in_flight: usize,
    /// Ids per summary cache query
    pub cache_batch_size: usize,
}

impl Default for SummaryEngineConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 1_000,
            cache_batch_size: 100_000,
        }
    }
}

/// Turns txids into fee/weight summaries, reading the cache first and
/// building the misses from node data.
pub struct SummaryEngine {
    node: Arc<dyn NodeRpc>,
    store: Arc<dyn SummaryStore>,
    config: SummaryEngineConfig,
}

impl SummaryEngine {
    pub fn new(
        node: Arc<dyn NodeRpc>,
        store: Arc<dyn SummaryStore>,
        config: SummaryEngineConfig,
    ) -> Self {
        Self {
            node,
            store,
            config,
        }
    }

    /// Returns a summary for every requested txid that is cached or could be
    /// built. `None` marks a transaction the node does not know. Ids whose
    /// construction failed are left out.
    pub async fn process(
        &self,
        txids: &[String],
    ) -> Result<HashMap<String, Option<TransactionSummary>>, EngineError> {
        let mut seen = HashSet::with_capacity(txids.len());
        let unique: Vec<&String> = txids.iter().filter(|txid| seen.insert(*txid)).collect();

        let mut records = self.load_cached(&unique).await?;
        let hits = records.len();

        let misses: Vec<String> = unique
            .into_iter()
            .filter(|txid| !records.contains_key(*txid))
            .cloned()
            .collect();

        info!(
            "Found {} summaries in cache, constructing {}",
            hits,
            misses.len()
        );

        if misses.is_empty() {
            return Ok(records);
        }

        let attempted = misses.len();
        let constructed = self.construct_all(misses).await;

        let mut transport_failures = 0;
        let mut last_transport_error = None;
        for (txid, result) in constructed {
            match result {
                Ok(summary) => {
                    records.insert(txid, summary);
                }
                Err(e) => match e.transport_error() {
                    Ok(rpc_error) => {
                        debug!("Node unreachable while summarizing {}: {}", txid, rpc_error);
                        transport_failures += 1;
                        last_transport_error = Some(rpc_error);
                    }
                    Err(e) => warn!("Failed to summarize {}: {}", txid, e),
                },
            }
        }

        if let Some(last) = last_transport_error {
            if transport_failures == attempted {
                return Err(EngineError::Systemic { attempted, last });
            }
            warn!(
                "{} of {} summary constructions could not reach the node",
                transport_failures, attempted
            );
        }

        info!("Summary batch done: {} results", records.len());
        Ok(records)
    }

    async fn load_cached(
        &self,
        txids: &[&String],
    ) -> Result<HashMap<String, Option<TransactionSummary>>, PersistenceError> {
        let mut records = HashMap::with_capacity(txids.len());

        for chunk in txids.chunks(self.config.cache_batch_size.max(1)) {
            let ids: Vec<String> = chunk.iter().map(|txid| (*txid).clone()).collect();
            for summary in self.store.get_summaries(&ids).await? {
                records.insert(summary.txid.clone(), Some(summary));
            }
        }

        Ok(records)
    }

    /// Builds every missing summary with at most `max_in_flight` running at once
    async fn construct_all(
        &self,
        txids: Vec<String>,
    ) -> Vec<(String, Result<Option<TransactionSummary>, ConstructError>)> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_in_flight.max(1)));
        let mut tasks = JoinSet::new();
        let mut results = Vec::with_capacity(txids.len());

        for txid in txids {
            // The semaphore is never closed, so acquiring only waits
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };

            let node = Arc::clone(&self.node);
            let store = Arc::clone(&self.store);
            tasks.spawn(async move {
                let result = build_and_store(node.as_ref(), store.as_ref(), &txid).await;
                drop(permit);
                (txid, result)
            });

            // Collect what already finished so results do not pile up in the set
            while let Some(joined) = tasks.try_join_next() {
                collect(joined, &mut results);
            }
        }

        while let Some(joined) = tasks.join_next().await {
            collect(joined, &mut results);
        }

        results
    }
}

fn collect<T>(joined: Result<T, tokio::task::JoinError>, results: &mut Vec<T>) {
    match joined {
        Ok(result) => results.push(result),
        Err(e) => warn!("Summary construction task failed: {}", e),
    }
}

/// Builds a summary and writes it to the cache. A failed cache write is
/// logged and the summary is still returned.
async fn build_and_store(
    node: &dyn NodeRpc,
    store: &dyn SummaryStore,
    txid: &str,
) -> Result<Option<TransactionSummary>, ConstructError> {
    let summary = build_summary(node, txid).await?;

    if let Some(summary) = &summary {
        if let Err(e) = store.insert_summary(summary).await {
            warn!("Failed to cache summary of {}: {}", txid, e);
        }
    }

    Ok(summary)
}

/// Fetches a transaction and the outputs it spends and sums their values
pub async fn build_summary(
    node: &dyn NodeRpc,
    txid: &str,
) -> Result<Option<TransactionSummary>, ConstructError> {
    let Some(tx) = node.get_raw_transaction(txid).await? else {
        return Ok(None);
    };

    let outputs = tx.output_value_sat();
    let inputs = match tx.is_coinbase() {
        Some(true) => outputs,
        Some(false) => spent_value_sat(node, &tx).await?,
        None => return Err(ConstructError::MalformedTransaction(txid.to_string())),
    };

    Ok(Some(TransactionSummary::new(txid, tx.weight, inputs, outputs)))
}

/// Sum of the previous outputs spent by `tx`, in satoshis
async fn spent_value_sat(node: &dyn NodeRpc, tx: &RawTransaction) -> Result<u64, ConstructError> {
    let mut previous_txids: Vec<&str> = tx
        .vin
        .iter()
        .filter_map(|input| input.txid.as_deref())
        .collect();
    previous_txids.sort_unstable();
    previous_txids.dedup();

    let fetched = try_join_all(previous_txids.iter().map(|previous| async move {
        node.get_raw_transaction(previous)
            .await
            .map(|found| (*previous, found))
    }))
    .await?;
    let previous: HashMap<&str, Option<RawTransaction>> = fetched.into_iter().collect();

    let mut total = 0u64;
    for input in &tx.vin {
        let (Some(previous_txid), Some(vout)) = (input.txid.as_deref(), input.vout) else {
            return Err(ConstructError::MalformedTransaction(tx.txid.clone()));
        };

        let previous_tx = previous
            .get(previous_txid)
            .and_then(Option::as_ref)
            .ok_or_else(|| ConstructError::MissingPreviousTransaction(previous_txid.to_string()))?;

        let output = previous_tx
            .vout
            .get(vout as usize)
            .ok_or_else(|| ConstructError::MissingOutput {
                txid: previous_txid.to_string(),
                vout,
            })?;

        total += output.value_sat();
    }

    Ok(total)
}

#[cfg(test)]
#[path = "summary_engine_tests.rs"]
mod tests;
