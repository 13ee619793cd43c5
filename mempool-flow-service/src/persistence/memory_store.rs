use async_trait::async_trait;
use chrono::Utc;
use mempool_flow::TransactionSummary;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

use super::store::{
    HistoryRecord, HistoryStore, PersistenceError, SummaryStore, TransactionLogEntry, TxLogStore,
    DEFAULT_SUMMARY_TTL_SECS,
};

/// Store kept entirely in process memory, used in test mode
pub struct MemoryStore {
    summaries: RwLock<HashMap<String, (TransactionSummary, i64)>>,
    log: RwLock<HashMap<String, i64>>,
    history: RwLock<Vec<HistoryRecord>>,
    summary_ttl_secs: i64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_ttl(Duration::from_secs(DEFAULT_SUMMARY_TTL_SECS))
    }

    /// Creates a store whose summaries expire after `ttl`
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            summaries: RwLock::new(HashMap::new()),
            log: RwLock::new(HashMap::new()),
            history: RwLock::new(Vec::new()),
            summary_ttl_secs: i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX),
        }
    }

    pub async fn summary_count(&self) -> usize {
        self.summaries.read().await.len()
    }

    pub async fn log_len(&self) -> usize {
        self.log.read().await.len()
    }

    fn is_live(&self, cache_time: i64, now: i64) -> bool {
        now.saturating_sub(cache_time) < self.summary_ttl_secs
    }
}

#[async_trait]
impl SummaryStore for MemoryStore {
    async fn get_summaries(
        &self,
        txids: &[String],
    ) -> Result<Vec<TransactionSummary>, PersistenceError> {
        let now = Utc::now().timestamp();
        let summaries = self.summaries.read().await;

        Ok(txids
            .iter()
            .filter_map(|txid| summaries.get(txid))
            .filter(|(_, cache_time)| self.is_live(*cache_time, now))
            .map(|(summary, _)| summary.clone())
            .collect())
    }

    async fn insert_summary(&self, summary: &TransactionSummary) -> Result<(), PersistenceError> {
        let now = Utc::now().timestamp();
        let mut summaries = self.summaries.write().await;

        // An expired entry is replaced, a live one is kept as is
        let live = summaries
            .get(&summary.txid)
            .is_some_and(|(_, cache_time)| self.is_live(*cache_time, now));
        if !live {
            summaries.insert(summary.txid.clone(), (summary.clone(), now));
        }
        Ok(())
    }

    async fn purge_expired_summaries(&self) -> Result<usize, PersistenceError> {
        let now = Utc::now().timestamp();
        let mut summaries = self.summaries.write().await;

        let before = summaries.len();
        summaries.retain(|_, (_, cache_time)| self.is_live(*cache_time, now));
        let purged = before - summaries.len();

        debug!("Purged {} expired summaries", purged);
        Ok(purged)
    }
}

#[async_trait]
impl TxLogStore for MemoryStore {
    async fn insert_log_entry(
        &self,
        txid: &str,
        time: Option<i64>,
    ) -> Result<(), PersistenceError> {
        let time = time.unwrap_or_else(|| Utc::now().timestamp());
        let mut log = self.log.write().await;

        log.entry(txid.to_string())
            .and_modify(|existing| *existing = (*existing).min(time))
            .or_insert(time);
        Ok(())
    }

    async fn insert_log_entries(
        &self,
        entries: &[TransactionLogEntry],
    ) -> Result<(), PersistenceError> {
        let mut log = self.log.write().await;

        for entry in entries {
            log.entry(entry.txid.clone())
                .and_modify(|existing| *existing = (*existing).min(entry.time))
                .or_insert(entry.time);
        }
        Ok(())
    }

    async fn trim_log(&self, older_than: i64) -> Result<usize, PersistenceError> {
        let mut log = self.log.write().await;

        let before = log.len();
        log.retain(|_, time| *time >= older_than);
        Ok(before - log.len())
    }

    async fn fetch_log(&self, since: i64) -> Result<Vec<TransactionLogEntry>, PersistenceError> {
        let log = self.log.read().await;

        let mut entries: Vec<TransactionLogEntry> = log
            .iter()
            .filter(|(_, time)| **time >= since)
            .map(|(txid, time)| TransactionLogEntry::new(txid.clone(), *time))
            .collect();
        entries.sort_by(|a, b| a.time.cmp(&b.time).then_with(|| a.txid.cmp(&b.txid)));
        Ok(entries)
    }
}

#[async_trait]
impl HistoryStore for MemoryStore {
    async fn insert_history(&self, time: i64, json: &Value) -> Result<(), PersistenceError> {
        self.history.write().await.push(HistoryRecord {
            time,
            json: json.clone(),
        });
        Ok(())
    }

    async fn fetch_history(&self, since: i64) -> Result<Vec<HistoryRecord>, PersistenceError> {
        let history = self.history.read().await;

        let mut records: Vec<HistoryRecord> =
            history.iter().filter(|r| r.time >= since).cloned().collect();
        records.sort_by_key(|r| r.time);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_summary_insert_is_idempotent() -> Result<(), PersistenceError> {
        let store = MemoryStore::new();
        let original = TransactionSummary::new("a", 400, 2_000, 1_000);

        store.insert_summary(&original).await?;
        store
            .insert_summary(&TransactionSummary::new("a", 999, 9, 9))
            .await?;

        let found = store
            .get_summaries(&["a".to_string(), "missing".to_string()])
            .await?;
        assert_eq!(found, vec![original]);
        Ok(())
    }

    #[tokio::test]
    async fn test_expired_summaries_are_hidden_and_purged() -> Result<(), PersistenceError> {
        let store = MemoryStore::with_ttl(Duration::ZERO);
        store
            .insert_summary(&TransactionSummary::new("a", 400, 2_000, 1_000))
            .await?;

        assert!(store.get_summaries(&["a".to_string()]).await?.is_empty());
        assert_eq!(store.purge_expired_summaries().await?, 1);
        assert_eq!(store.summary_count().await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_log_keeps_earliest_time() -> Result<(), PersistenceError> {
        let store = MemoryStore::new();

        store.insert_log_entry("a", Some(200)).await?;
        store.insert_log_entry("a", Some(100)).await?;
        store.insert_log_entry("a", Some(300)).await?;
        store
            .insert_log_entries(&[
                TransactionLogEntry::new("a", 150),
                TransactionLogEntry::new("b", 50),
            ])
            .await?;

        let entries = store.fetch_log(0).await?;
        assert_eq!(
            entries,
            vec![
                TransactionLogEntry::new("b", 50),
                TransactionLogEntry::new("a", 100),
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_trim_and_fetch_bounds() -> Result<(), PersistenceError> {
        let store = MemoryStore::new();
        for (txid, time) in [("a", 10), ("b", 20), ("c", 30)] {
            store.insert_log_entry(txid, Some(time)).await?;
        }

        // Entries at exactly `since` are included, at exactly `older_than` kept
        assert_eq!(store.fetch_log(20).await?.len(), 2);
        assert_eq!(store.trim_log(20).await?, 1);
        assert_eq!(store.log_len().await, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_insert_without_time_uses_now() -> Result<(), PersistenceError> {
        let store = MemoryStore::new();
        let before = Utc::now().timestamp();

        store.insert_log_entry("a", None).await?;

        let entries = store.fetch_log(before).await?;
        assert_eq!(entries.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_history_is_ordered() -> Result<(), PersistenceError> {
        let store = MemoryStore::new();
        store.insert_history(20, &serde_json::json!({"run": 2})).await?;
        store.insert_history(10, &serde_json::json!({"run": 1})).await?;

        let records = store.fetch_history(0).await?;
        assert_eq!(records[0].json["run"], 1);
        assert_eq!(records[1].json["run"], 2);
        assert_eq!(store.fetch_history(15).await?.len(), 1);
        Ok(())
    }
}
