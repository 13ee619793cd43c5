use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{MempoolEntry, NodeRpc, RawTransaction, RpcError, TxInput, TxOutput};

#[derive(Default)]
struct MockState {
    transactions: HashMap<String, RawTransaction>,
    mempool: HashMap<String, MempoolEntry>,
    failing: HashSet<String>,
}

/// In-memory node for tests and `--test-mode`
#[derive(Default)]
pub struct MockNode {
    state: Mutex<MockState>,
    unreachable: AtomicBool,
    transaction_calls: AtomicUsize,
}

impl MockNode {
    pub fn new() -> Self {
        Self::default()
    }

    /// A node holding one confirmed funding transaction and a handful of
    /// mempool transactions spending it at 1 to 50 sat/vB
    pub fn with_sample_mempool(now: i64) -> Self {
        let node = Self::new();

        node.add_transaction(RawTransaction::new(
            "sample-coinbase",
            800,
            vec![TxInput::coinbase("03a0bb0d")],
            vec![TxOutput::new(50.0); 5],
        ));

        // (txid, weight, fee in sat)
        let spends = [
            ("sample-a", 800u64, 200i64),
            ("sample-b", 600, 1_500),
            ("sample-c", 1_200, 6_000),
            ("sample-d", 400, 5_000),
        ];
        for (vout, (txid, weight, fee)) in spends.into_iter().enumerate() {
            let output = 50.0 - fee as f64 / 100_000_000.0;
            node.add_transaction(RawTransaction::new(
                txid,
                weight,
                vec![TxInput::spending("sample-coinbase", vout as u32)],
                vec![TxOutput::new(output)],
            ));
            node.add_to_mempool(txid, now - 60 * (vout as i64 + 1));
        }

        node
    }

    /// Makes a transaction retrievable through `getrawtransaction`
    pub fn add_transaction(&self, tx: RawTransaction) {
        self.lock().transactions.insert(tx.txid.clone(), tx);
    }

    /// Lists a txid in the mempool with the given first-seen time
    pub fn add_to_mempool(&self, txid: impl Into<String>, time: i64) {
        self.lock()
            .mempool
            .insert(txid.into(), MempoolEntry { time, weight: None });
    }

    pub fn remove_from_mempool(&self, txid: &str) {
        self.lock().mempool.remove(txid);
    }

    /// Makes `getrawtransaction` for this txid answer with a node error
    pub fn fail_transaction(&self, txid: impl Into<String>) {
        self.lock().failing.insert(txid.into());
    }

    /// Simulates a node that cannot be reached
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Number of `getrawtransaction` calls served so far
    pub fn transaction_calls(&self) -> usize {
        self.transaction_calls.load(Ordering::SeqCst)
    }

    fn check_reachable(&self) -> Result<(), RpcError> {
        if self.unreachable.load(Ordering::SeqCst) {
            Err(RpcError::Closed)
        } else {
            Ok(())
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl NodeRpc for MockNode {
    async fn get_raw_mempool(&self) -> Result<Vec<String>, RpcError> {
        self.check_reachable()?;
        let mut txids: Vec<String> = self.lock().mempool.keys().cloned().collect();
        txids.sort();
        Ok(txids)
    }

    async fn get_raw_mempool_verbose(&self) -> Result<HashMap<String, MempoolEntry>, RpcError> {
        self.check_reachable()?;
        Ok(self.lock().mempool.clone())
    }

    async fn get_raw_transaction(&self, txid: &str) -> Result<Option<RawTransaction>, RpcError> {
        self.check_reachable()?;
        self.transaction_calls.fetch_add(1, Ordering::SeqCst);

        let state = self.lock();
        if state.failing.contains(txid) {
            return Err(RpcError::Node {
                code: -1,
                message: format!("simulated failure for {txid}"),
            });
        }
        Ok(state.transactions.get(txid).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sample_mempool() {
        let node = MockNode::with_sample_mempool(1_000_000);

        let txids = node.get_raw_mempool().await.unwrap();
        assert_eq!(txids, vec!["sample-a", "sample-b", "sample-c", "sample-d"]);

        let entries = node.get_raw_mempool_verbose().await.unwrap();
        assert_eq!(entries["sample-a"].time, 1_000_000 - 60);

        let funding = node.get_raw_transaction("sample-coinbase").await.unwrap().unwrap();
        assert_eq!(funding.is_coinbase(), Some(true));
        assert_eq!(node.transaction_calls(), 1);
    }

    #[tokio::test]
    async fn test_unknown_and_failing_transactions() {
        let node = MockNode::new();
        node.fail_transaction("bad");

        assert!(node.get_raw_transaction("missing").await.unwrap().is_none());
        assert!(matches!(
            node.get_raw_transaction("bad").await,
            Err(RpcError::Node { code: -1, .. })
        ));
    }

    #[tokio::test]
    async fn test_unreachable_node() {
        let node = MockNode::new();
        node.set_unreachable(true);

        let err = node.get_raw_mempool().await.unwrap_err();
        assert!(err.is_transport());
        assert_eq!(node.transaction_calls(), 0);
    }
}
