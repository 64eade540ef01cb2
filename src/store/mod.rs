//! Case storage with pluggable backends.
//!
//! Supports:
//! - `memory`: In-memory storage (non-persistent, for testing)
//! - `sqlite`: SQLite database holding cases, docket entries and the cost ledger

mod memory;
mod sqlite;

pub use memory::InMemoryCaseStore;
pub use sqlite::SqliteCaseStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::budget::LedgerEntry;
use crate::case::{DocketEntry, MonitoredCase};

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Storage I/O error: {0}")]
    Io(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(e.to_string())
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Database(format!("Task join error: {}", e))
    }
}

/// A docket entry together with the case it belongs to and when we first saw it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEntry {
    pub case_number: String,
    #[serde(flatten)]
    pub entry: DocketEntry,
    pub first_seen: DateTime<Utc>,
}

/// Case store trait - implemented by all storage backends.
#[async_trait]
pub trait CaseStore: Send + Sync {
    /// Whether this store persists data across restarts.
    fn is_persistent(&self) -> bool;

    /// Insert or fully replace a case.
    async fn save_case(&self, case: &MonitoredCase) -> Result<(), StoreError>;

    async fn get_case(&self, case_number: &str) -> Result<Option<MonitoredCase>, StoreError>;

    /// All cases, high priority first, then by case number.
    async fn list_cases(&self) -> Result<Vec<MonitoredCase>, StoreError>;

    /// Remove a case and its docket entries. Ledger rows are kept.
    async fn delete_case(&self, case_number: &str) -> Result<bool, StoreError>;

    /// Store entries not seen before for this case and return them.
    async fn record_entries(
        &self,
        case_number: &str,
        entries: &[DocketEntry],
        seen_at: DateTime<Utc>,
    ) -> Result<Vec<DocketEntry>, StoreError>;

    /// Most recently discovered entries across all cases.
    async fn recent_entries(&self, limit: usize) -> Result<Vec<StoredEntry>, StoreError>;

    async fn append_ledger(&self, entry: &LedgerEntry) -> Result<(), StoreError>;

    /// Ledger rows recorded at or after `since`, oldest first.
    async fn ledger_entries_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<LedgerEntry>, StoreError>;
}

fn sort_cases(cases: &mut [MonitoredCase]) {
    cases.sort_by(|a, b| {
        a.priority
            .rank()
            .cmp(&b.priority.rank())
            .then_with(|| a.case_number.cmp(&b.case_number))
    });
}
