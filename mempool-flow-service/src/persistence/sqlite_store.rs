use async_trait::async_trait;
use chrono::Utc;
use mempool_flow::TransactionSummary;
use rusqlite::types::ToSql;
use rusqlite::{params, params_from_iter, Connection};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info};

use super::store::{
    HistoryRecord, HistoryStore, PersistenceError, SummaryStore, TransactionLogEntry, TxLogStore,
};

/// Ids per `IN (...)` query, well below SQLite's bound-variable limit
const QUERY_CHUNK_SIZE: usize = 500;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tx_summary (
    txid TEXT PRIMARY KEY,
    cache_time INTEGER NOT NULL,
    weight INTEGER NOT NULL,
    inputs INTEGER NOT NULL,
    outputs INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_tx_summary_cache_time ON tx_summary (cache_time);

CREATE TABLE IF NOT EXISTS tx_log (
    txid TEXT PRIMARY KEY,
    time INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_tx_log_time ON tx_log (time);

CREATE TABLE IF NOT EXISTS history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    time INTEGER NOT NULL,
    json TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_history_time ON history (time);
"#;

/// SQLite-backed store for summaries, the transaction log and run history.
///
/// The connection is shared behind a mutex and every query runs on the
/// blocking thread pool.
pub struct SqliteStore {
    connection: Arc<Mutex<Connection>>,
    summary_ttl_secs: i64,
}

impl SqliteStore {
    /// Opens (or creates) the database at `path` and purges expired summaries
    pub fn open(path: impl AsRef<Path>, summary_ttl: Duration) -> Result<Self, PersistenceError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let connection = Connection::open(path)?;
        let store = Self::from_connection(connection, summary_ttl)?;

        info!("Database connection established: {}", path.display());
        Ok(store)
    }

    /// Opens a private in-memory database
    pub fn open_in_memory(summary_ttl: Duration) -> Result<Self, PersistenceError> {
        Self::from_connection(Connection::open_in_memory()?, summary_ttl)
    }

    fn from_connection(
        connection: Connection,
        summary_ttl: Duration,
    ) -> Result<Self, PersistenceError> {
        connection.execute_batch(SCHEMA)?;

        let summary_ttl_secs = i64::try_from(summary_ttl.as_secs()).unwrap_or(i64::MAX);
        let purged = purge_expired(&connection, summary_ttl_secs)?;
        if purged > 0 {
            debug!("Purged {} expired summaries on open", purged);
        }

        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
            summary_ttl_secs,
        })
    }

    /// Runs `f` with the connection on the blocking thread pool
    async fn with_connection<F, R>(&self, f: F) -> Result<R, PersistenceError>
    where
        F: FnOnce(&mut Connection) -> Result<R, PersistenceError> + Send + 'static,
        R: Send + 'static,
    {
        let connection = Arc::clone(&self.connection);
        tokio::task::spawn_blocking(move || {
            let mut connection = connection.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut connection)
        })
        .await?
    }
}

/// Oldest `cache_time` still considered live
fn live_threshold(ttl_secs: i64) -> i64 {
    Utc::now().timestamp().saturating_sub(ttl_secs)
}

fn purge_expired(connection: &Connection, ttl_secs: i64) -> Result<usize, PersistenceError> {
    let deleted = connection.execute(
        "DELETE FROM tx_summary WHERE cache_time <= ?1",
        params![live_threshold(ttl_secs)],
    )?;
    Ok(deleted)
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn to_sql_int(value: u64, field: &str) -> Result<i64, PersistenceError> {
    i64::try_from(value)
        .map_err(|_| {
            PersistenceError::InvalidData(format!("{field} {value} does not fit in INTEGER"))
        })
}

#[async_trait]
impl SummaryStore for SqliteStore {
    async fn get_summaries(
        &self,
        txids: &[String],
    ) -> Result<Vec<TransactionSummary>, PersistenceError> {
        let txids = txids.to_vec();
        let ttl_secs = self.summary_ttl_secs;

        self.with_connection(move |connection| {
            let threshold = live_threshold(ttl_secs);
            let mut summaries = Vec::new();

            for chunk in txids.chunks(QUERY_CHUNK_SIZE) {
                let sql = format!(
                    "SELECT txid, weight, inputs, outputs FROM tx_summary \
                     WHERE cache_time > ? AND txid IN ({})",
                    placeholders(chunk.len())
                );
                let mut statement = connection.prepare_cached(&sql)?;

                let mut values: Vec<&dyn ToSql> = Vec::with_capacity(chunk.len() + 1);
                values.push(&threshold);
                values.extend(chunk.iter().map(|txid| txid as &dyn ToSql));

                let rows = statement.query_map(params_from_iter(values), |row| {
                    Ok(TransactionSummary {
                        txid: row.get(0)?,
                        weight: row.get::<_, i64>(1)? as u64,
                        inputs: row.get::<_, i64>(2)? as u64,
                        outputs: row.get::<_, i64>(3)? as u64,
                    })
                })?;
                for row in rows {
                    summaries.push(row?);
                }
            }

            Ok(summaries)
        })
        .await
    }

    async fn insert_summary(&self, summary: &TransactionSummary) -> Result<(), PersistenceError> {
        let summary = summary.clone();
        let ttl_secs = self.summary_ttl_secs;

        self.with_connection(move |connection| {
            let now = Utc::now().timestamp();
            // Live rows win; an expired row that was not purged yet is replaced
            connection.execute(
                "INSERT INTO tx_summary (txid, cache_time, weight, inputs, outputs) \
                 VALUES (?1, ?2, ?3, ?4, ?5) \
                 ON CONFLICT (txid) DO UPDATE SET \
                     cache_time = excluded.cache_time, \
                     weight = excluded.weight, \
                     inputs = excluded.inputs, \
                     outputs = excluded.outputs \
                 WHERE tx_summary.cache_time <= ?6",
                params![
                    summary.txid,
                    now,
                    to_sql_int(summary.weight, "weight")?,
                    to_sql_int(summary.inputs, "inputs")?,
                    to_sql_int(summary.outputs, "outputs")?,
                    now.saturating_sub(ttl_secs),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn purge_expired_summaries(&self) -> Result<usize, PersistenceError> {
        let ttl_secs = self.summary_ttl_secs;
        self.with_connection(move |connection| purge_expired(connection, ttl_secs))
            .await
    }
}

const UPSERT_LOG_ENTRY: &str = "INSERT INTO tx_log (txid, time) VALUES (?1, ?2) \
     ON CONFLICT (txid) DO UPDATE SET time = MIN(time, excluded.time)";

#[async_trait]
impl TxLogStore for SqliteStore {
    async fn insert_log_entry(
        &self,
        txid: &str,
        time: Option<i64>,
    ) -> Result<(), PersistenceError> {
        let txid = txid.to_string();
        let time = time.unwrap_or_else(|| Utc::now().timestamp());

        self.with_connection(move |connection| {
            connection.execute(UPSERT_LOG_ENTRY, params![txid, time])?;
            Ok(())
        })
        .await
    }

    async fn insert_log_entries(
        &self,
        entries: &[TransactionLogEntry],
    ) -> Result<(), PersistenceError> {
        let entries = entries.to_vec();

        self.with_connection(move |connection| {
            let tx = connection.transaction()?;
            {
                let mut statement = tx.prepare_cached(UPSERT_LOG_ENTRY)?;
                for entry in &entries {
                    statement.execute(params![entry.txid, entry.time])?;
                }
            }
            tx.commit()?;

            debug!("Logged {} transaction sightings", entries.len());
            Ok(())
        })
        .await
    }

    async fn trim_log(&self, older_than: i64) -> Result<usize, PersistenceError> {
        self.with_connection(move |connection| {
            let deleted =
                connection.execute("DELETE FROM tx_log WHERE time < ?1", params![older_than])?;
            Ok(deleted)
        })
        .await
    }

    async fn fetch_log(&self, since: i64) -> Result<Vec<TransactionLogEntry>, PersistenceError> {
        self.with_connection(move |connection| {
            let mut statement = connection
                .prepare_cached(
                    "SELECT txid, time FROM tx_log WHERE time >= ?1 ORDER BY time, txid",
                )?;
            let rows = statement.query_map(params![since], |row| {
                Ok(TransactionLogEntry {
                    txid: row.get(0)?,
                    time: row.get(1)?,
                })
            })?;

            let mut entries = Vec::new();
            for row in rows {
                entries.push(row?);
            }
            Ok(entries)
        })
        .await
    }
}

#[async_trait]
impl HistoryStore for SqliteStore {
    async fn insert_history(&self, time: i64, json: &Value) -> Result<(), PersistenceError> {
        let json = serde_json::to_string(json)?;

        self.with_connection(move |connection| {
            connection.execute(
                "INSERT INTO history (time, json) VALUES (?1, ?2)",
                params![time, json],
            )?;
            Ok(())
        })
        .await
    }

    async fn fetch_history(&self, since: i64) -> Result<Vec<HistoryRecord>, PersistenceError> {
        self.with_connection(move |connection| {
            let mut statement = connection
                .prepare_cached(
                    "SELECT time, json FROM history WHERE time >= ?1 ORDER BY time, id",
                )?;
            let rows = statement.query_map(params![since], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?;

            let mut records = Vec::new();
            for row in rows {
                let (time, json) = row?;
                records.push(HistoryRecord {
                    time,
                    json: serde_json::from_str(&json)?,
                });
            }
            Ok(records)
        })
        .await
    }
}
