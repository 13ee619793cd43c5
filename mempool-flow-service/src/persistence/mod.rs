//! Persistence layer for the summary cache, the transaction log and run history

mod memory_store;
mod sqlite_store;
mod store;

pub use memory_store::MemoryStore;
pub use sqlite_store::SqliteStore;
pub use store::{
    HistoryRecord, HistoryStore, PersistenceError, SummaryStore, TransactionLogEntry, TxLogStore,
    DEFAULT_SUMMARY_TTL_SECS,
};
