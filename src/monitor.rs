//! Case monitor: decides when and how each case is checked.
//!
//! A due case is first looked up in the free source. Only when that has
//! nothing newer than our last check does the monitor consider a paid query,
//! and then only inside the allowed polling window and when the cost ledger
//! can reserve the estimated fee.
//!
//! # Invariants
//! - A paid query never starts without a granted `Reservation`
//! - Skipped checks (window closed, budget) never advance `last_checked`
//! - A failed paid query releases its reservation and leaves the ledger unchanged
//! - Every check, scheduled or forced, holds one of `max_concurrent_checks`
//!   permits until its paid query (if any) has finished
//! - A started paid query is committed even if the caller stops waiting,
//!   since the court bills it regardless

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};

use crate::budget::{BudgetError, CostLedger, Operation, Reservation, RetryPolicy};
use crate::case::{DocketSnapshot, MonitoredCase, Priority};
use crate::config::Config;
use crate::notify::{GateDecision, Notification, NotificationGate};
use crate::schedule::{PollIntervals, PollWindow};
use crate::sources::{FreeSource, PaidSource};
use crate::store::{CaseStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("Case not found: {0}")]
    UnknownCase(String),

    #[error("Invalid case: {0}")]
    InvalidCase(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Budget(#[from] BudgetError),
}

/// Where fresh docket data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckSource {
    Free,
    Paid,
}

/// Result of checking one case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CheckOutcome {
    /// Docket fetched, nothing new
    Unchanged { source: CheckSource },
    /// New entries stored. On a case's first check they form the baseline
    /// and nothing is notified.
    Updated {
        source: CheckSource,
        new_entries: usize,
        notified: usize,
        suppressed: usize,
    },
    NotDue,
    SkippedWindowClosed,
    SkippedBudget { needed_cents: u64, remaining_cents: u64 },
    Failed { reason: String },
}

/// Tally of one monitoring cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub quarter: String,
    pub checked: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub not_due: usize,
    pub skipped_window: usize,
    pub skipped_budget: usize,
    pub failed: usize,
    pub new_entries: usize,
    pub notified: usize,
    pub suppressed: usize,
    pub spent_cents: u64,
    pub remaining_cents: u64,
}

impl CycleReport {
    fn tally(&mut self, outcome: &CheckOutcome) {
        if !matches!(outcome, CheckOutcome::NotDue) {
            self.checked += 1;
        }
        match outcome {
            CheckOutcome::Unchanged { .. } => self.unchanged += 1,
            CheckOutcome::Updated {
                new_entries,
                notified,
                suppressed,
                ..
            } => {
                self.updated += 1;
                self.new_entries += new_entries;
                self.notified += notified;
                self.suppressed += suppressed;
            }
            CheckOutcome::NotDue => self.not_due += 1,
            CheckOutcome::SkippedWindowClosed => self.skipped_window += 1,
            CheckOutcome::SkippedBudget { .. } => self.skipped_budget += 1,
            CheckOutcome::Failed { .. } => self.failed += 1,
        }
    }
}

/// Scheduling knobs for `CaseMonitor`.
#[derive(Debug, Clone, Copy)]
pub struct MonitorOptions {
    pub intervals: PollIntervals,
    pub window: PollWindow,
    pub retry: RetryPolicy,
    pub max_concurrent_checks: usize,
    pub cycle_interval: Duration,
    pub error_backoff: Duration,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for MonitorOptions {
    fn from(config: &Config) -> Self {
        Self {
            intervals: config.intervals,
            window: config.window,
            retry: config.retry,
            max_concurrent_checks: config.run_loop.max_concurrent_checks,
            cycle_interval: config.run_loop.cycle_interval(),
            error_backoff: config.run_loop.error_backoff(),
        }
    }
}

pub struct CaseMonitor {
    store: Arc<dyn CaseStore>,
    ledger: Arc<CostLedger>,
    free: Option<Arc<dyn FreeSource>>,
    paid: Option<Arc<dyn PaidSource>>,
    notifier: Option<NotificationGate>,
    options: MonitorOptions,
    permits: Arc<Semaphore>,
}

impl CaseMonitor {
    pub fn new(
        store: Arc<dyn CaseStore>,
        ledger: Arc<CostLedger>,
        options: MonitorOptions,
    ) -> Self {
        Self {
            store,
            ledger,
            free: None,
            paid: None,
            notifier: None,
            permits: Arc::new(Semaphore::new(options.max_concurrent_checks.max(1))),
            options,
        }
    }

    pub fn with_free_source(mut self, source: Arc<dyn FreeSource>) -> Self {
        self.free = Some(source);
        self
    }

    pub fn with_paid_source(mut self, source: Arc<dyn PaidSource>) -> Self {
        self.paid = Some(source);
        self
    }

    pub fn with_notifier(mut self, gate: NotificationGate) -> Self {
        self.notifier = Some(gate);
        self
    }

    pub fn ledger(&self) -> &Arc<CostLedger> {
        &self.ledger
    }

    pub fn store(&self) -> &Arc<dyn CaseStore> {
        &self.store
    }

    pub fn options(&self) -> &MonitorOptions {
        &self.options
    }

    /// Start monitoring a case, or change the priority of one already monitored.
    pub async fn add_case(
        &self,
        case_number: &str,
        court_id: &str,
        priority: Priority,
    ) -> Result<MonitoredCase, MonitorError> {
        let case_number = case_number.trim();
        let court_id = court_id.trim();
        if case_number.is_empty() {
            return Err(MonitorError::InvalidCase("case number is empty".into()));
        }
        if court_id.is_empty() {
            return Err(MonitorError::InvalidCase("court id is empty".into()));
        }

        let case = match self.store.get_case(case_number).await? {
            Some(mut existing) => {
                existing.priority = priority;
                existing
            }
            None => MonitoredCase::new(case_number, court_id, priority),
        };
        self.store.save_case(&case).await?;
        tracing::info!(
            case = %case.case_number,
            court = %case.court_id,
            priority = %case.priority,
            "Monitoring case"
        );
        Ok(case)
    }

    pub async fn remove_case(&self, case_number: &str) -> Result<(), MonitorError> {
        if self.store.delete_case(case_number).await? {
            tracing::info!(case = %case_number, "Stopped monitoring case");
            Ok(())
        } else {
            Err(MonitorError::UnknownCase(case_number.to_string()))
        }
    }

    pub async fn list_cases(&self) -> Result<Vec<MonitoredCase>, MonitorError> {
        Ok(self.store.list_cases().await?)
    }

    pub async fn set_notifications(
        &self,
        case_number: &str,
        enabled: bool,
    ) -> Result<MonitoredCase, MonitorError> {
        let mut case = self
            .store
            .get_case(case_number)
            .await?
            .ok_or_else(|| MonitorError::UnknownCase(case_number.to_string()))?;
        case.notifications_enabled = enabled;
        self.store.save_case(&case).await?;
        Ok(case)
    }

    /// Check a case now regardless of its poll interval. Window and budget
    /// still apply.
    pub async fn force_check(
        &self,
        case_number: &str,
        now: DateTime<Utc>,
    ) -> Result<CheckOutcome, MonitorError> {
        let case = self
            .store
            .get_case(case_number)
            .await?
            .ok_or_else(|| MonitorError::UnknownCase(case_number.to_string()))?;
        Ok(self.check(case, now, true).await)
    }

    /// Check a case if its poll interval has elapsed.
    pub async fn check_case(&self, case: MonitoredCase, now: DateTime<Utc>) -> CheckOutcome {
        self.check(case, now, false).await
    }

    async fn check(&self, case: MonitoredCase, now: DateTime<Utc>, force: bool) -> CheckOutcome {
        if !force && !self.options.intervals.is_due(&case, now) {
            return CheckOutcome::NotDue;
        }
        let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
            return CheckOutcome::Failed {
                reason: "monitor is shutting down".to_string(),
            };
        };

        let case_number = case.case_number.clone();
        let outcome = match self.try_check(case, now, permit).await {
            Ok(outcome) => outcome,
            Err(e) => CheckOutcome::Failed {
                reason: e.to_string(),
            },
        };

        match &outcome {
            CheckOutcome::SkippedBudget {
                needed_cents,
                remaining_cents,
            } => tracing::warn!(
                case = %case_number,
                needed_cents,
                remaining_cents,
                "Skipped paid check: insufficient budget"
            ),
            CheckOutcome::SkippedWindowClosed => tracing::info!(
                case = %case_number,
                "Skipped paid check: outside allowed polling window"
            ),
            CheckOutcome::Failed { reason } => {
                tracing::error!(case = %case_number, "Check failed: {}", reason)
            }
            _ => tracing::debug!(case = %case_number, ?outcome, "Checked case"),
        }
        outcome
    }

    async fn try_check(
        &self,
        case: MonitoredCase,
        now: DateTime<Utc>,
        permit: OwnedSemaphorePermit,
    ) -> Result<CheckOutcome, MonitorError> {
        let mut free_responded = false;
        if let Some(free) = &self.free {
            match free.lookup(&case).await {
                Ok(Some(snapshot)) if snapshot.is_fresher_than(case.last_checked) => {
                    tracing::debug!(case = %case.case_number, source = free.name(), "Using free docket data");
                    return self.apply_snapshot(case, snapshot, CheckSource::Free, now).await;
                }
                Ok(_) => free_responded = true,
                Err(e) => tracing::warn!(
                    case = %case.case_number,
                    source = free.name(),
                    "Free source unavailable: {}",
                    e
                ),
            }
        }

        let Some(paid) = &self.paid else {
            if free_responded {
                self.mark_checked(&case.case_number, now).await?;
                return Ok(CheckOutcome::Unchanged {
                    source: CheckSource::Free,
                });
            }
            return Ok(CheckOutcome::Failed {
                reason: "no docket source available".to_string(),
            });
        };

        if !self.options.window.is_within_allowed_window(now) {
            return Ok(CheckOutcome::SkippedWindowClosed);
        }

        let reservation = match self
            .ledger
            .reserve(&case.case_number, Operation::DocketCheck, now)
            .await
        {
            Ok(reservation) => reservation,
            Err(BudgetError::InsufficientBudget { needed, remaining }) => {
                return Ok(CheckOutcome::SkippedBudget {
                    needed_cents: needed,
                    remaining_cents: remaining,
                });
            }
            Err(e) => return Err(e.into()),
        };

        let query = tokio::spawn(paid_query(
            Arc::clone(&self.ledger),
            Arc::clone(paid),
            self.options.retry,
            case.clone(),
            reservation,
            now,
            permit,
        ));
        let snapshot = match query.await {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(reason)) => return Ok(CheckOutcome::Failed { reason }),
            Err(e) => {
                return Ok(CheckOutcome::Failed {
                    reason: format!("paid query aborted: {}", e),
                })
            }
        };

        self.apply_snapshot(case, snapshot, CheckSource::Paid, now).await
    }

    /// Store new entries, update the case, and notify.
    async fn apply_snapshot(
        &self,
        case: MonitoredCase,
        snapshot: DocketSnapshot,
        source: CheckSource,
        now: DateTime<Utc>,
    ) -> Result<CheckOutcome, MonitorError> {
        let baseline = case.last_checked.is_none() && case.fingerprint.is_none();
        let fingerprint = snapshot.fingerprint();

        let new_entries = if case.fingerprint.as_deref() == Some(fingerprint.as_str()) {
            Vec::new()
        } else {
            self.store
                .record_entries(&case.case_number, &snapshot.entries, now)
                .await?
        };

        // Re-read so concurrent edits (priority, notifications) are not clobbered.
        let Some(mut current) = self.store.get_case(&case.case_number).await? else {
            tracing::info!(case = %case.case_number, "Case removed during check");
            return Ok(CheckOutcome::Unchanged { source });
        };
        current.last_checked = Some(now);
        current.fingerprint = Some(fingerprint);
        if !new_entries.is_empty() {
            current.last_updated = Some(now);
        }
        self.store.save_case(&current).await?;

        if new_entries.is_empty() {
            return Ok(CheckOutcome::Unchanged { source });
        }

        tracing::info!(
            case = %current.case_number,
            new_entries = new_entries.len(),
            source = ?source,
            baseline,
            "Found new docket entries"
        );

        let (mut notified, mut suppressed) = (0, 0);
        if !baseline && current.notifications_enabled {
            if let Some(gate) = &self.notifier {
                for entry in &new_entries {
                    let notification = Notification::for_entry(&current, entry.clone(), now);
                    match gate.submit(&notification).await {
                        Ok(GateDecision::Delivered) => notified += 1,
                        Ok(_) => suppressed += 1,
                        Err(e) => {
                            suppressed += 1;
                            tracing::error!(
                                case = %current.case_number,
                                entry = entry.entry_number,
                                "Notification failed: {}",
                                e
                            );
                        }
                    }
                }
            }
        }

        Ok(CheckOutcome::Updated {
            source,
            new_entries: new_entries.len(),
            notified,
            suppressed,
        })
    }

    async fn mark_checked(&self, case_number: &str, now: DateTime<Utc>) -> Result<(), MonitorError> {
        if let Some(mut case) = self.store.get_case(case_number).await? {
            case.last_checked = Some(now);
            self.store.save_case(&case).await?;
        }
        Ok(())
    }

    /// Check every due case, at most `max_concurrent_checks` at a time.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<CycleReport, MonitorError> {
        let cases = self.store.list_cases().await?;

        let checks = cases
            .into_iter()
            .map(|case| self.check(case, now, false));
        let outcomes = futures::future::join_all(checks).await;

        let mut report = CycleReport::default();
        for outcome in &outcomes {
            report.tally(outcome);
        }

        let budget = self.ledger.state(now).await;
        report.quarter = crate::budget::Quarter::containing(now).label();
        report.spent_cents = budget.spent_cents;
        report.remaining_cents = budget.remaining_cents();

        let allowance = budget.limits.allowance_cents();
        if allowance > 0 && report.remaining_cents * 5 < allowance {
            tracing::warn!(
                quarter = %report.quarter,
                spent_cents = report.spent_cents,
                remaining_cents = report.remaining_cents,
                "Quarterly budget nearly exhausted"
            );
        }
        tracing::info!(
            quarter = %report.quarter,
            checked = report.checked,
            updated = report.updated,
            skipped_budget = report.skipped_budget,
            skipped_window = report.skipped_window,
            failed = report.failed,
            spent_cents = report.spent_cents,
            remaining_cents = report.remaining_cents,
            "Monitoring cycle complete"
        );
        Ok(report)
    }

    /// Run cycles until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            max_concurrent_checks = self.options.max_concurrent_checks,
            cycle_interval_secs = self.options.cycle_interval.as_secs(),
            "Starting monitor loop"
        );

        while !*shutdown.borrow() {
            let pause = match self.run_cycle(Utc::now()).await {
                Ok(_) => self.options.cycle_interval,
                Err(e) => {
                    tracing::error!("Monitoring cycle failed: {}", e);
                    self.options.error_backoff
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        tracing::info!("Monitor loop stopped");
    }
}

/// Run a reserved paid query to completion and book what it billed.
///
/// Runs as its own task so that a caller dropping the check future cannot
/// strand the reservation or skip the commit.
async fn paid_query(
    ledger: Arc<CostLedger>,
    paid: Arc<dyn PaidSource>,
    retry: RetryPolicy,
    case: MonitoredCase,
    reservation: Reservation,
    now: DateTime<Utc>,
    _permit: OwnedSemaphorePermit,
) -> Result<DocketSnapshot, String> {
    let target = &case;
    let fetched = retry
        .run("Paid docket query", |_| paid.fetch_docket(target))
        .await;

    let snapshot = match fetched {
        Ok(snapshot) => snapshot,
        Err(e) => {
            ledger.release(reservation);
            return Err(format!("{}: {}", paid.name(), e));
        }
    };

    match ledger.commit(reservation, snapshot.pages, now).await {
        Ok(entry) => tracing::info!(
            case = %case.case_number,
            source = paid.name(),
            pages = entry.pages,
            cost_cents = entry.cost_cents,
            "Paid docket query"
        ),
        // The spend is still counted in memory; only persistence failed.
        Err(e) => tracing::error!(
            case = %case.case_number,
            "Failed to persist ledger entry: {}",
            e
        ),
    }
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::{BudgetLimits, PricingConfig};
    use crate::case::DocketEntry;
    use crate::notify::testing::RecordingSink;
    use crate::sources::SourceError;
    use crate::store::InMemoryCaseStore;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 3, 0, 0).unwrap()
    }

    fn entries(count: u32) -> Vec<DocketEntry> {
        (1..=count)
            .map(|n| DocketEntry {
                entry_number: n,
                date_filed: chrono::NaiveDate::from_ymd_opt(2024, 1, n.min(28)),
                description: format!("ORDER number {}", n),
                document_url: None,
            })
            .collect()
    }

    fn snapshot(count: u32, as_of: DateTime<Utc>, pages: u32) -> DocketSnapshot {
        DocketSnapshot {
            entries: entries(count),
            pages,
            as_of,
        }
    }

    struct FakeFree {
        result: Result<Option<DocketSnapshot>, SourceError>,
        calls: AtomicUsize,
    }

    impl FakeFree {
        fn new(result: Result<Option<DocketSnapshot>, SourceError>) -> Arc<Self> {
            Arc::new(Self {
                result,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl FreeSource for FakeFree {
        fn name(&self) -> &str {
            "fake-free"
        }

        async fn lookup(&self, _case: &MonitoredCase) -> Result<Option<DocketSnapshot>, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    struct FakePaid {
        snapshot: DocketSnapshot,
        error: Option<SourceError>,
        delay: std::time::Duration,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl FakePaid {
        fn new(snapshot: DocketSnapshot) -> Self {
            Self {
                snapshot,
                error: None,
                delay: std::time::Duration::ZERO,
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl PaidSource for FakePaid {
        fn name(&self) -> &str {
            "fake-paid"
        }

        async fn fetch_docket(&self, _case: &MonitoredCase) -> Result<DocketSnapshot, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            match &self.error {
                Some(e) => Err(e.clone()),
                None => Ok(self.snapshot.clone()),
            }
        }
    }

    struct Harness {
        monitor: CaseMonitor,
        store: Arc<InMemoryCaseStore>,
        sink: Arc<RecordingSink>,
    }

    async fn harness(
        free: Option<Arc<FakeFree>>,
        paid: Option<Arc<FakePaid>>,
        limits: BudgetLimits,
        options: MonitorOptions,
    ) -> Harness {
        let store = Arc::new(InMemoryCaseStore::new());
        let ledger = CostLedger::load(limits, PricingConfig::default(), store.clone(), now())
            .await
            .unwrap();
        let sink = Arc::new(RecordingSink::default());

        let mut monitor = CaseMonitor::new(store.clone(), Arc::new(ledger), options)
            .with_notifier(NotificationGate::new(sink.clone(), [], None));
        if let Some(free) = free {
            monitor = monitor.with_free_source(free);
        }
        if let Some(paid) = paid {
            monitor = monitor.with_paid_source(paid);
        }
        Harness {
            monitor,
            store,
            sink,
        }
    }

    fn options() -> MonitorOptions {
        MonitorOptions {
            window: PollWindow::unrestricted(),
            retry: RetryPolicy::none(),
            ..MonitorOptions::default()
        }
    }

    async fn checked_case(h: &Harness, last_checked: DateTime<Utc>) -> MonitoredCase {
        let mut case = h
            .monitor
            .add_case("2:21-cv-00234", "txed", Priority::High)
            .await
            .unwrap();
        case.last_checked = Some(last_checked);
        case.fingerprint = Some(crate::case::fingerprint(&entries(2)));
        h.store.save_case(&case).await.unwrap();
        h.store
            .record_entries(&case.case_number, &entries(2), last_checked)
            .await
            .unwrap();
        case
    }

    #[tokio::test]
    async fn test_first_check_sets_baseline_without_notifying() {
        let free = FakeFree::new(Ok(Some(snapshot(3, now(), 0))));
        let paid = Arc::new(FakePaid::new(snapshot(3, now(), 4)));
        let h = harness(Some(free), Some(paid.clone()), BudgetLimits::default(), options()).await;

        let case = h.monitor.add_case("2:21-cv-00234", "TXED", Priority::High).await.unwrap();
        let outcome = h.monitor.check_case(case, now()).await;

        assert_eq!(
            outcome,
            CheckOutcome::Updated {
                source: CheckSource::Free,
                new_entries: 3,
                notified: 0,
                suppressed: 0
            }
        );
        assert_eq!(paid.calls.load(Ordering::SeqCst), 0);
        assert!(h.sink.sent.lock().await.is_empty());
        let stored = h.store.get_case("2:21-cv-00234").await.unwrap().unwrap();
        assert_eq!(stored.last_checked, Some(now()));
        assert_eq!(stored.court_id, "txed");
        assert_eq!(h.monitor.ledger().cumulative_spend(now()).await, 0);
    }

    #[tokio::test]
    async fn test_fresher_free_data_notifies_new_entries_only() {
        let earlier = now() - ChronoDuration::hours(2);
        let free = FakeFree::new(Ok(Some(snapshot(4, now(), 0))));
        let h = harness(Some(free), None, BudgetLimits::default(), options()).await;
        let case = checked_case(&h, earlier).await;

        let outcome = h.monitor.check_case(case, now()).await;
        assert_eq!(
            outcome,
            CheckOutcome::Updated {
                source: CheckSource::Free,
                new_entries: 2,
                notified: 2,
                suppressed: 0
            }
        );
        let sent = h.sink.sent.lock().await;
        let numbers: Vec<u32> = sent.iter().map(|n| n.entry.entry_number).collect();
        assert_eq!(numbers, vec![3, 4]);
    }

    #[tokio::test]
    async fn test_stale_free_data_falls_back_to_paid() {
        let earlier = now() - ChronoDuration::hours(2);
        let stale = snapshot(2, earlier - ChronoDuration::hours(1), 0);
        let free = FakeFree::new(Ok(Some(stale)));
        let paid = Arc::new(FakePaid::new(snapshot(3, now(), 4)));
        let h = harness(Some(free.clone()), Some(paid.clone()), BudgetLimits::default(), options()).await;
        let case = checked_case(&h, earlier).await;

        let outcome = h.monitor.check_case(case, now()).await;
        assert!(matches!(
            outcome,
            CheckOutcome::Updated { source: CheckSource::Paid, new_entries: 1, notified: 1, .. }
        ));
        assert_eq!(free.calls.load(Ordering::SeqCst), 1);
        assert_eq!(paid.calls.load(Ordering::SeqCst), 1);
        // 4 pages at 10 cents
        assert_eq!(h.monitor.ledger().cumulative_spend(now()).await, 40);
    }

    #[tokio::test]
    async fn test_unavailable_free_source_falls_back_to_paid() {
        let free = FakeFree::new(Err(SourceError::Network("timeout".into())));
        let paid = Arc::new(FakePaid::new(snapshot(1, now(), 2)));
        let h = harness(Some(free), Some(paid.clone()), BudgetLimits::default(), options()).await;

        let case = h.monitor.add_case("1:24-cv-00001", "nysd", Priority::Low).await.unwrap();
        let outcome = h.monitor.check_case(case, now()).await;
        assert!(matches!(outcome, CheckOutcome::Updated { source: CheckSource::Paid, .. }));
        assert_eq!(h.monitor.ledger().cumulative_spend(now()).await, 20);
    }

    #[tokio::test]
    async fn test_budget_skip_leaves_case_unchecked() {
        let earlier = now() - ChronoDuration::hours(2);
        let free = FakeFree::new(Ok(None));
        let paid = Arc::new(FakePaid::new(snapshot(3, now(), 3)));
        // Allowance of 20 cents cannot cover a 30 cent docket check
        let h = harness(Some(free), Some(paid.clone()), BudgetLimits::new(100, 80), options()).await;
        let case = checked_case(&h, earlier).await;

        let outcome = h.monitor.check_case(case, now()).await;
        assert_eq!(
            outcome,
            CheckOutcome::SkippedBudget {
                needed_cents: 30,
                remaining_cents: 20
            }
        );
        assert_eq!(paid.calls.load(Ordering::SeqCst), 0);
        let stored = h.store.get_case("2:21-cv-00234").await.unwrap().unwrap();
        assert_eq!(stored.last_checked, Some(earlier));
    }

    #[tokio::test]
    async fn test_closed_window_skips_paid_query() {
        let earlier = now() - ChronoDuration::hours(2);
        let free = FakeFree::new(Ok(None));
        let paid = Arc::new(FakePaid::new(snapshot(3, now(), 3)));
        let opts = MonitorOptions {
            // 03:00 UTC is outside 18:00-06:00 at UTC-10 (17:00 local)
            window: PollWindow {
                start_hour: 18,
                end_hour: 6,
                utc_offset_hours: -10,
            },
            ..options()
        };
        let h = harness(Some(free.clone()), Some(paid.clone()), BudgetLimits::default(), opts).await;
        let case = checked_case(&h, earlier).await;

        assert_eq!(h.monitor.check_case(case, now()).await, CheckOutcome::SkippedWindowClosed);
        assert_eq!(free.calls.load(Ordering::SeqCst), 1);
        assert_eq!(paid.calls.load(Ordering::SeqCst), 0);
        let stored = h.store.get_case("2:21-cv-00234").await.unwrap().unwrap();
        assert_eq!(stored.last_checked, Some(earlier));
    }

    #[tokio::test]
    async fn test_failed_paid_query_leaves_ledger_unchanged() {
        let mut paid = FakePaid::new(snapshot(3, now(), 3));
        paid.error = Some(SourceError::Server {
            status: 503,
            message: "unavailable".into(),
        });
        let paid = Arc::new(paid);
        let opts = MonitorOptions {
            retry: RetryPolicy::new(2, std::time::Duration::ZERO),
            ..options()
        };
        let h = harness(None, Some(paid.clone()), BudgetLimits::default(), opts).await;
        let case = h.monitor.add_case("2:21-cv-00234", "txed", Priority::High).await.unwrap();

        let outcome = h.monitor.check_case(case, now()).await;
        assert!(matches!(outcome, CheckOutcome::Failed { .. }));
        assert_eq!(paid.calls.load(Ordering::SeqCst), 3);

        let state = h.monitor.ledger().state(now()).await;
        assert_eq!(state.spent_cents, 0);
        assert_eq!(state.reserved_cents, 0);
        let stored = h.store.get_case("2:21-cv-00234").await.unwrap().unwrap();
        assert_eq!(stored.last_checked, None);
    }

    #[tokio::test]
    async fn test_low_priority_not_rechecked_after_an_hour() {
        let free = FakeFree::new(Ok(Some(snapshot(3, now(), 0))));
        let h = harness(Some(free.clone()), None, BudgetLimits::default(), options()).await;
        let mut case = h.monitor.add_case("1:24-cv-00001", "nysd", Priority::Low).await.unwrap();
        case.last_checked = Some(now() - ChronoDuration::hours(1));
        h.store.save_case(&case).await.unwrap();

        assert_eq!(h.monitor.check_case(case, now()).await, CheckOutcome::NotDue);
        assert_eq!(free.calls.load(Ordering::SeqCst), 0);

        // Dashboard "check now" ignores the interval
        let forced = h.monitor.force_check("1:24-cv-00001", now()).await.unwrap();
        assert_ne!(forced, CheckOutcome::NotDue);
        assert_eq!(free.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disabled_notifications_are_not_sent() {
        let earlier = now() - ChronoDuration::hours(2);
        let free = FakeFree::new(Ok(Some(snapshot(5, now(), 0))));
        let h = harness(Some(free), None, BudgetLimits::default(), options()).await;
        checked_case(&h, earlier).await;
        let case = h.monitor.set_notifications("2:21-cv-00234", false).await.unwrap();

        let outcome = h.monitor.check_case(case, now()).await;
        assert!(matches!(outcome, CheckOutcome::Updated { new_entries: 3, notified: 0, .. }));
        assert!(h.sink.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_add_case_upserts_priority() {
        let h = harness(None, None, BudgetLimits::default(), options()).await;
        let case = checked_case(&h, now()).await;
        assert_eq!(case.priority, Priority::High);

        let updated = h.monitor.add_case("2:21-cv-00234", "txed", Priority::Low).await.unwrap();
        assert_eq!(updated.priority, Priority::Low);
        assert_eq!(updated.last_checked, Some(now()));
        assert_eq!(h.monitor.list_cases().await.unwrap().len(), 1);

        assert!(matches!(
            h.monitor.add_case(" ", "txed", Priority::Low).await,
            Err(MonitorError::InvalidCase(_))
        ));
        h.monitor.remove_case("2:21-cv-00234").await.unwrap();
        assert!(matches!(
            h.monitor.remove_case("2:21-cv-00234").await,
            Err(MonitorError::UnknownCase(_))
        ));
    }

    #[tokio::test]
    async fn test_cycle_respects_concurrency_limit() {
        let mut paid = FakePaid::new(snapshot(1, now(), 1));
        paid.delay = std::time::Duration::from_millis(20);
        let paid = Arc::new(paid);
        let opts = MonitorOptions {
            max_concurrent_checks: 2,
            ..options()
        };
        let h = harness(None, Some(paid.clone()), BudgetLimits::default(), opts).await;
        for n in 0..6 {
            h.monitor
                .add_case(&format!("1:24-cv-0000{}", n), "nysd", Priority::Medium)
                .await
                .unwrap();
        }

        let report = h.monitor.run_cycle(now()).await.unwrap();
        assert_eq!(report.checked, 6);
        assert_eq!(report.updated, 6);
        assert_eq!(report.spent_cents, 60);
        assert_eq!(report.quarter, "2024-Q1");
        assert!(paid.max_in_flight.load(Ordering::SeqCst) <= 2);
        assert_eq!(paid.calls.load(Ordering::SeqCst), 6);

        // Nothing is due right after
        let again = h.monitor.run_cycle(now()).await.unwrap();
        assert_eq!(again.not_due, 6);
        assert_eq!(again.checked, 0);
    }

    #[tokio::test]
    async fn test_forced_checks_share_concurrency_limit() {
        let mut paid = FakePaid::new(snapshot(1, now(), 1));
        paid.delay = std::time::Duration::from_millis(100);
        let paid = Arc::new(paid);
        let opts = MonitorOptions {
            max_concurrent_checks: 1,
            ..options()
        };
        let h = harness(None, Some(paid.clone()), BudgetLimits::default(), opts).await;
        for number in ["1:24-cv-00001", "1:24-cv-00002"] {
            h.monitor.add_case(number, "nysd", Priority::Medium).await.unwrap();
        }

        let (first, second) = tokio::join!(
            h.monitor.force_check("1:24-cv-00001", now()),
            h.monitor.force_check("1:24-cv-00002", now()),
        );
        assert!(matches!(first.unwrap(), CheckOutcome::Updated { source: CheckSource::Paid, .. }));
        assert!(matches!(second.unwrap(), CheckOutcome::Updated { source: CheckSource::Paid, .. }));
        assert_eq!(paid.calls.load(Ordering::SeqCst), 2);
        assert_eq!(paid.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_check_still_books_paid_query() {
        let mut paid = FakePaid::new(snapshot(1, now(), 3));
        paid.delay = std::time::Duration::from_millis(200);
        let paid = Arc::new(paid);
        let h = harness(None, Some(paid.clone()), BudgetLimits::default(), options()).await;
        h.monitor.add_case("2:21-cv-00234", "txed", Priority::High).await.unwrap();

        // Caller gives up while the paid query is in flight
        let abandoned = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            h.monitor.force_check("2:21-cv-00234", now()),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(h.monitor.ledger().state(now()).await.reserved_cents, 30);

        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        let state = h.monitor.ledger().state(now()).await;
        assert_eq!(state.reserved_cents, 0);
        assert_eq!(state.spent_cents, 30);
        assert_eq!(paid.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dropped_reservation_does_not_shrink_allowance() {
        let h = harness(None, None, BudgetLimits::new(160, 100), options()).await;
        let ledger = h.monitor.ledger();

        // A check future dropped between reserve and commit
        let check = async {
            let _held = ledger
                .reserve("2:21-cv-00234", Operation::DocketCheck, now())
                .await
                .unwrap();
            std::future::pending::<()>().await;
        };
        let abandoned = tokio::time::timeout(std::time::Duration::from_millis(10), check).await;
        assert!(abandoned.is_err());

        let state = ledger.state(now()).await;
        assert_eq!(state.reserved_cents, 0);
        assert_eq!(state.remaining_cents(), 60);
    }

    #[tokio::test]
    async fn test_cycle_never_overbooks_budget() {
        let paid = Arc::new(FakePaid::new(snapshot(1, now(), 3)));
        // Room for exactly two 30 cent checks
        let h = harness(None, Some(paid.clone()), BudgetLimits::new(160, 100), options()).await;
        for n in 0..5 {
            h.monitor
                .add_case(&format!("1:24-cv-0000{}", n), "nysd", Priority::High)
                .await
                .unwrap();
        }

        let report = h.monitor.run_cycle(now()).await.unwrap();
        assert_eq!(report.updated, 2);
        assert_eq!(report.skipped_budget, 3);
        assert_eq!(report.spent_cents, 60);
        assert_eq!(paid.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let h = harness(None, None, BudgetLimits::default(), options()).await;
        let (tx, rx) = watch::channel(false);
        let monitor = Arc::new(h.monitor);

        let handle = tokio::spawn({
            let monitor = monitor.clone();
            async move { monitor.run(rx).await }
        });
        tx.send(true).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("monitor loop did not stop")
            .unwrap();
    }
}
