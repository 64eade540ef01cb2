//! In-memory case store (non-persistent).

use super::{sort_cases, CaseStore, StoreError, StoredEntry};
use crate::budget::LedgerEntry;
use crate::case::{DocketEntry, MonitoredCase};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Clone)]
pub struct InMemoryCaseStore {
    cases: Arc<RwLock<HashMap<String, MonitoredCase>>>,
    entries: Arc<RwLock<Vec<StoredEntry>>>,
    ledger: Arc<RwLock<Vec<LedgerEntry>>>,
}

impl InMemoryCaseStore {
    pub fn new() -> Self {
        Self {
            cases: Arc::new(RwLock::new(HashMap::new())),
            entries: Arc::new(RwLock::new(Vec::new())),
            ledger: Arc::new(RwLock::new(Vec::new())),
        }
    }
}

impl Default for InMemoryCaseStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CaseStore for InMemoryCaseStore {
    fn is_persistent(&self) -> bool {
        false
    }

    async fn save_case(&self, case: &MonitoredCase) -> Result<(), StoreError> {
        self.cases
            .write()
            .await
            .insert(case.case_number.clone(), case.clone());
        Ok(())
    }

    async fn get_case(&self, case_number: &str) -> Result<Option<MonitoredCase>, StoreError> {
        Ok(self.cases.read().await.get(case_number).cloned())
    }

    async fn list_cases(&self) -> Result<Vec<MonitoredCase>, StoreError> {
        let mut cases: Vec<MonitoredCase> = self.cases.read().await.values().cloned().collect();
        sort_cases(&mut cases);
        Ok(cases)
    }

    async fn delete_case(&self, case_number: &str) -> Result<bool, StoreError> {
        let removed = self.cases.write().await.remove(case_number).is_some();
        self.entries
            .write()
            .await
            .retain(|e| e.case_number != case_number);
        Ok(removed)
    }

    async fn record_entries(
        &self,
        case_number: &str,
        entries: &[DocketEntry],
        seen_at: DateTime<Utc>,
    ) -> Result<Vec<DocketEntry>, StoreError> {
        let mut stored = self.entries.write().await;
        let mut new_entries = Vec::new();
        for entry in entries {
            let exists = stored
                .iter()
                .any(|s| s.case_number == case_number && s.entry.entry_number == entry.entry_number);
            if !exists {
                stored.push(StoredEntry {
                    case_number: case_number.to_string(),
                    entry: entry.clone(),
                    first_seen: seen_at,
                });
                new_entries.push(entry.clone());
            }
        }
        Ok(new_entries)
    }

    async fn recent_entries(&self, limit: usize) -> Result<Vec<StoredEntry>, StoreError> {
        let mut entries = self.entries.read().await.clone();
        entries.sort_by(|a, b| b.first_seen.cmp(&a.first_seen));
        entries.truncate(limit);
        Ok(entries)
    }

    async fn append_ledger(&self, entry: &LedgerEntry) -> Result<(), StoreError> {
        self.ledger.write().await.push(entry.clone());
        Ok(())
    }

    async fn ledger_entries_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        let mut rows: Vec<LedgerEntry> = self
            .ledger
            .read()
            .await
            .iter()
            .filter(|e| e.recorded_at >= since)
            .cloned()
            .collect();
        rows.sort_by_key(|e| e.recorded_at);
        Ok(rows)
    }
}
