use async_trait::async_trait;
use mempool_flow::TransactionSummary;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Default lifetime of a cached summary (2 days)
pub const DEFAULT_SUMMARY_TTL_SECS: u64 = 2 * 24 * 60 * 60;

/// Persistence layer errors
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Invalid stored value: {0}")]
    InvalidData(String),
}

/// First sighting of a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionLogEntry {
    pub txid: String,
    /// Unix time in seconds
    pub time: i64,
}

impl TransactionLogEntry {
    pub fn new(txid: impl Into<String>, time: i64) -> Self {
        Self {
            txid: txid.into(),
            time,
        }
    }
}

/// One persisted estimation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Unix time in seconds
    pub time: i64,
    pub json: Value,
}

/// Cache of transaction summaries keyed by txid
#[async_trait]
pub trait SummaryStore: Send + Sync {
    /// Returns the unexpired summaries among `txids`; unknown ids are skipped
    async fn get_summaries(
        &self,
        txids: &[String],
    ) -> Result<Vec<TransactionSummary>, PersistenceError>;

    /// Stores a summary unless one with the same txid exists
    async fn insert_summary(&self, summary: &TransactionSummary) -> Result<(), PersistenceError>;

    /// Deletes expired summaries, returning how many were removed
    async fn purge_expired_summaries(&self) -> Result<usize, PersistenceError>;
}

/// Log of first-seen times, one entry per txid
#[async_trait]
pub trait TxLogStore: Send + Sync {
    /// Records a sighting; `None` means now. Repeated sightings keep the earliest time.
    async fn insert_log_entry(&self, txid: &str, time: Option<i64>) -> Result<(), PersistenceError>;

    /// Records many sightings with the same keep-the-earliest rule
    async fn insert_log_entries(
        &self,
        entries: &[TransactionLogEntry],
    ) -> Result<(), PersistenceError>;

    /// Deletes entries with `time < older_than`, returning how many were removed
    async fn trim_log(&self, older_than: i64) -> Result<usize, PersistenceError>;

    /// Entries with `time >= since`
    async fn fetch_log(&self, since: i64) -> Result<Vec<TransactionLogEntry>, PersistenceError>;
}

/// Append-only record of estimation runs
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn insert_history(&self, time: i64, json: &Value) -> Result<(), PersistenceError>;

    /// Records with `time >= since`, oldest first
    async fn fetch_history(&self, since: i64) -> Result<Vec<HistoryRecord>, PersistenceError>;
}
