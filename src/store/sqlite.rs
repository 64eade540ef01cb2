//! SQLite-based case store with docket history and cost ledger.

use super::{sort_cases, CaseStore, StoreError, StoredEntry};
use crate::budget::{LedgerEntry, Operation, Quarter};
use crate::case::{DocketEntry, MonitoredCase, Priority};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS cases (
    case_number TEXT PRIMARY KEY NOT NULL,
    court_id TEXT NOT NULL,
    case_name TEXT,
    priority TEXT NOT NULL DEFAULT 'medium',
    notifications_enabled INTEGER NOT NULL DEFAULT 1,
    last_checked TEXT,
    last_updated TEXT,
    fingerprint TEXT
);

CREATE TABLE IF NOT EXISTS docket_entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    case_number TEXT NOT NULL,
    entry_number INTEGER NOT NULL,
    date_filed TEXT,
    description TEXT NOT NULL,
    document_url TEXT,
    first_seen TEXT NOT NULL,
    UNIQUE (case_number, entry_number),
    FOREIGN KEY (case_number) REFERENCES cases(case_number) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_entries_first_seen ON docket_entries(first_seen DESC);

CREATE TABLE IF NOT EXISTS cost_ledger (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    case_number TEXT NOT NULL,
    operation TEXT NOT NULL,
    pages INTEGER NOT NULL,
    cost_cents INTEGER NOT NULL,
    recorded_at TEXT NOT NULL,
    quarter TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_ledger_recorded_at ON cost_ledger(recorded_at);
CREATE INDEX IF NOT EXISTS idx_ledger_quarter ON cost_ledger(quarter);
"#;

/// Fixed-width UTC timestamps so string comparison in SQL matches time order.
fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp '{}': {}", value, e)))
}

fn parse_opt_ts(value: Option<String>) -> Result<Option<DateTime<Utc>>, StoreError> {
    value.as_deref().map(parse_ts).transpose()
}

fn parse_date(value: Option<String>) -> Option<NaiveDate> {
    value.and_then(|v| NaiveDate::parse_from_str(&v, "%Y-%m-%d").ok())
}

struct CaseRow {
    case_number: String,
    court_id: String,
    case_name: Option<String>,
    priority: String,
    notifications_enabled: bool,
    last_checked: Option<String>,
    last_updated: Option<String>,
    fingerprint: Option<String>,
}

const CASE_COLUMNS: &str = "case_number, court_id, case_name, priority, notifications_enabled,
                            last_checked, last_updated, fingerprint";

impl CaseRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            case_number: row.get(0)?,
            court_id: row.get(1)?,
            case_name: row.get(2)?,
            priority: row.get(3)?,
            notifications_enabled: row.get::<_, i32>(4)? != 0,
            last_checked: row.get(5)?,
            last_updated: row.get(6)?,
            fingerprint: row.get(7)?,
        })
    }

    fn into_case(self) -> Result<MonitoredCase, StoreError> {
        let priority = self.priority.parse::<Priority>().unwrap_or_else(|e| {
            tracing::warn!(case = %self.case_number, "{}; treating as medium", e);
            Priority::Medium
        });
        Ok(MonitoredCase {
            case_number: self.case_number,
            court_id: self.court_id,
            case_name: self.case_name,
            priority,
            notifications_enabled: self.notifications_enabled,
            last_checked: parse_opt_ts(self.last_checked)?,
            last_updated: parse_opt_ts(self.last_updated)?,
            fingerprint: self.fingerprint,
        })
    }
}

pub struct SqliteCaseStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCaseStore {
    pub async fn new(db_path: PathBuf) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Io(format!("Failed to create store dir: {}", e)))?;
        }

        // Open database in blocking task
        let conn = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path)?;
            conn.execute_batch(SCHEMA)?;
            Ok::<_, StoreError>(conn)
        })
        .await??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();
            f(&mut conn)
        })
        .await?
    }
}

#[async_trait]
impl CaseStore for SqliteCaseStore {
    fn is_persistent(&self) -> bool {
        true
    }

    async fn save_case(&self, case: &MonitoredCase) -> Result<(), StoreError> {
        let case = case.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO cases (case_number, court_id, case_name, priority,
                                    notifications_enabled, last_checked, last_updated, fingerprint)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(case_number) DO UPDATE SET
                    court_id = excluded.court_id,
                    case_name = excluded.case_name,
                    priority = excluded.priority,
                    notifications_enabled = excluded.notifications_enabled,
                    last_checked = excluded.last_checked,
                    last_updated = excluded.last_updated,
                    fingerprint = excluded.fingerprint",
                params![
                    case.case_number,
                    case.court_id,
                    case.case_name,
                    case.priority.as_str(),
                    case.notifications_enabled as i32,
                    case.last_checked.map(ts),
                    case.last_updated.map(ts),
                    case.fingerprint,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_case(&self, case_number: &str) -> Result<Option<MonitoredCase>, StoreError> {
        let case_number = case_number.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {} FROM cases WHERE case_number = ?1", CASE_COLUMNS),
                    params![case_number],
                    CaseRow::from_row,
                )
                .optional()?;
            row.map(CaseRow::into_case).transpose()
        })
        .await
    }

    async fn list_cases(&self) -> Result<Vec<MonitoredCase>, StoreError> {
        let mut cases: Vec<MonitoredCase> = self
            .with_conn(|conn| {
                let mut stmt = conn.prepare(&format!("SELECT {} FROM cases", CASE_COLUMNS))?;
                let rows = stmt
                    .query_map([], CaseRow::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows.into_iter().map(CaseRow::into_case).collect()
            })
            .await?;
        sort_cases(&mut cases);
        Ok(cases)
    }

    async fn delete_case(&self, case_number: &str) -> Result<bool, StoreError> {
        let case_number = case_number.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM docket_entries WHERE case_number = ?1",
                params![case_number],
            )?;
            let removed = tx.execute("DELETE FROM cases WHERE case_number = ?1", params![case_number])?;
            tx.commit()?;
            Ok(removed > 0)
        })
        .await
    }

    async fn record_entries(
        &self,
        case_number: &str,
        entries: &[DocketEntry],
        seen_at: DateTime<Utc>,
    ) -> Result<Vec<DocketEntry>, StoreError> {
        let case_number = case_number.to_string();
        let entries = entries.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let mut new_entries = Vec::new();
            {
                let mut stmt = tx.prepare(
                    "INSERT OR IGNORE INTO docket_entries
                        (case_number, entry_number, date_filed, description, document_url, first_seen)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )?;
                for entry in entries {
                    let inserted = stmt.execute(params![
                        case_number,
                        entry.entry_number,
                        entry.date_filed.map(|d| d.format("%Y-%m-%d").to_string()),
                        entry.description,
                        entry.document_url,
                        ts(seen_at),
                    ])?;
                    if inserted > 0 {
                        new_entries.push(entry);
                    }
                }
            }
            tx.commit()?;
            Ok(new_entries)
        })
        .await
    }

    async fn recent_entries(&self, limit: usize) -> Result<Vec<StoredEntry>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT case_number, entry_number, date_filed, description, document_url, first_seen
                 FROM docket_entries
                 ORDER BY first_seen DESC, id DESC
                 LIMIT ?1",
            )?;
            let rows = stmt
                .query_map(params![limit as i64], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, u32>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(|(case_number, entry_number, date_filed, description, document_url, first_seen)| {
                    Ok(StoredEntry {
                        case_number,
                        entry: DocketEntry {
                            entry_number,
                            date_filed: parse_date(date_filed),
                            description,
                            document_url,
                        },
                        first_seen: parse_ts(&first_seen)?,
                    })
                })
                .collect()
        })
        .await
    }

    async fn append_ledger(&self, entry: &LedgerEntry) -> Result<(), StoreError> {
        let entry = entry.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO cost_ledger (case_number, operation, pages, cost_cents, recorded_at, quarter)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    entry.case_number,
                    entry.operation.as_str(),
                    entry.pages,
                    entry.cost_cents as i64,
                    ts(entry.recorded_at),
                    Quarter::containing(entry.recorded_at).label(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn ledger_entries_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT case_number, operation, pages, cost_cents, recorded_at
                 FROM cost_ledger
                 WHERE recorded_at >= ?1
                 ORDER BY recorded_at ASC, id ASC",
            )?;
            let rows = stmt
                .query_map(params![ts(since)], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, u32>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(|(case_number, operation, pages, cost_cents, recorded_at)| {
                    Ok(LedgerEntry {
                        case_number,
                        operation: operation.parse::<Operation>().map_err(StoreError::Corrupt)?,
                        pages,
                        cost_cents: cost_cents.max(0) as u64,
                        recorded_at: parse_ts(&recorded_at)?,
                    })
                })
                .collect()
        })
        .await
    }
}
