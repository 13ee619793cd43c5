use std::sync::Arc;
use thiserror::Error;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::bitcoin::{NodeRpc, RpcError};
use crate::persistence::{PersistenceError, TransactionLogEntry, TxLogStore};

/// Mempool logger errors
#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

/// Records when transactions were first seen in the node's mempool
pub struct MempoolLogger {
    node: Arc<dyn NodeRpc>,
    tx_log: Arc<dyn TxLogStore>,
}

impl MempoolLogger {
    pub fn new(node: Arc<dyn NodeRpc>, tx_log: Arc<dyn TxLogStore>) -> Self {
        Self { node, tx_log }
    }

    /// Logs every transaction currently in the mempool with the time the node
    /// first saw it. Returns the number of entries written.
    pub async fn poll_once(&self) -> Result<usize, LoggerError> {
        let mempool = self.node.get_raw_mempool_verbose().await?;

        let entries: Vec<TransactionLogEntry> = mempool
            .into_iter()
            .map(|(txid, entry)| TransactionLogEntry::new(txid, entry.time))
            .collect();
        self.tx_log.insert_log_entries(&entries).await?;

        info!("Loaded {} transactions from mempool", entries.len());
        Ok(entries.len())
    }

    /// Polls forever; failures are logged and the next tick tries again
    pub async fn run(&self, poll_interval: Duration) {
        let mut ticker = interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Starting mempool logger with {:?} interval", poll_interval);

        loop {
            ticker.tick().await;

            match self.poll_once().await {
                Ok(count) => debug!("Mempool poll logged {} transactions", count),
                Err(e) => error!("Failed to poll mempool: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitcoin::MockNode;
    use crate::persistence::MemoryStore;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_poll_logs_mempool_with_first_seen_time() {
        let node = Arc::new(MockNode::new());
        node.add_to_mempool("a", 100);
        node.add_to_mempool("b", 200);
        let store = Arc::new(MemoryStore::new());
        let logger = MempoolLogger::new(node.clone(), store.clone());

        assert_eq!(logger.poll_once().await.unwrap(), 2);

        // A later sighting with a later time does not move the first-seen time
        node.add_to_mempool("a", 500);
        logger.poll_once().await.unwrap();

        let entries = store.fetch_log(0).await.unwrap();
        assert_eq!(
            entries,
            vec![
                TransactionLogEntry::new("a", 100),
                TransactionLogEntry::new("b", 200),
            ]
        );
    }

    #[tokio::test]
    async fn test_poll_fails_when_node_unreachable() {
        let node = Arc::new(MockNode::new());
        node.set_unreachable(true);
        let store = Arc::new(MemoryStore::new());
        let logger = MempoolLogger::new(node, store.clone());

        assert!(matches!(logger.poll_once().await, Err(LoggerError::Rpc(_))));
        assert_eq!(store.log_len().await, 0);
    }
}
