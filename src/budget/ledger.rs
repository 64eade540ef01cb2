//! Cost ledger: persisted spend rows plus in-flight reservations.
//!
//! # Invariants
//! - `state(now).spent_cents` equals the sum of `cost_cents` over entries
//!   whose quarter is the quarter containing `now`
//! - `reserve` tests affordability and books the estimate under a single
//!   lock acquisition, so concurrent checks can never both claim the last
//!   slice of allowance
//! - A `Reservation` that is dropped without `commit` or `release` (its
//!   check was cancelled) gives its estimate back
//!
//! # Overruns
//! Authorization is estimate-based: a paid query is allowed when its
//! estimate fits under `budget - buffer`. Once the query has run, the real
//! page count is billed whatever it is, so `commit` records the actual cost
//! even when it exceeds the estimate. A single overrun can therefore carry
//! spend past `budget - buffer` (never past what one query can cost, see
//! `PricingConfig::max_document_cents`); the safety buffer exists to absorb
//! it. Every later `reserve` sees the higher spend and is refused until the
//! quarter rolls over.

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, MutexGuard, PoisonError};
use tokio::sync::Mutex;

use super::budget::{BudgetError, BudgetLimits, BudgetState};
use super::pricing::{Operation, PricingConfig};
use crate::store::CaseStore;

/// Calendar quarter used as the fee accounting period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Quarter {
    pub year: i32,
    /// 1..=4
    pub index: u32,
}

impl Quarter {
    pub fn containing(at: DateTime<Utc>) -> Self {
        Self {
            year: at.year(),
            index: (at.month() - 1) / 3 + 1,
        }
    }

    pub fn start(&self) -> DateTime<Utc> {
        let month = (self.index - 1) * 3 + 1;
        Utc.with_ymd_and_hms(self.year, month, 1, 0, 0, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub fn next(&self) -> Self {
        if self.index == 4 {
            Self {
                year: self.year + 1,
                index: 1,
            }
        } else {
            Self {
                year: self.year,
                index: self.index + 1,
            }
        }
    }

    /// Exclusive end of the quarter, when the allowance resets.
    pub fn end(&self) -> DateTime<Utc> {
        self.next().start()
    }

    /// `YYYY-Q#`
    pub fn label(&self) -> String {
        format!("{}-Q{}", self.year, self.index)
    }
}

impl fmt::Display for Quarter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-Q{}", self.year, self.index)
    }
}

/// One billed query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub case_number: String,
    pub operation: Operation,
    pub pages: u32,
    pub cost_cents: u64,
    pub recorded_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn quarter(&self) -> Quarter {
        Quarter::containing(self.recorded_at)
    }
}

/// Estimates held by outstanding reservations, keyed by reservation id.
///
/// Shared with every `Reservation` so that dropping one can return its
/// estimate without the async ledger lock.
type Holds = Arc<std::sync::Mutex<HashMap<u64, u64>>>;

fn lock_holds(holds: &std::sync::Mutex<HashMap<u64, u64>>) -> MutexGuard<'_, HashMap<u64, u64>> {
    holds.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Allowance held for a paid query that has not finished yet.
///
/// Handed back through `CostLedger::commit` or `CostLedger::release`. If it
/// is dropped instead, the estimate is returned to the allowance.
#[must_use = "a reservation holds budget until committed or released"]
#[derive(Debug)]
pub struct Reservation {
    id: u64,
    case_number: String,
    operation: Operation,
    estimate_cents: u64,
    holds: Holds,
}

impl Reservation {
    pub fn case_number(&self) -> &str {
        &self.case_number
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn estimate_cents(&self) -> u64 {
        self.estimate_cents
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        let abandoned = lock_holds(&self.holds).remove(&self.id);
        if let Some(estimate_cents) = abandoned {
            tracing::debug!(
                reservation = self.id,
                case = %self.case_number,
                estimate_cents,
                "Abandoned reservation returned to allowance"
            );
        }
    }
}

/// Spend totals for one operation type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationTotals {
    pub queries: u64,
    pub pages: u64,
    pub cost_cents: u64,
}

/// Quarter-to-date cost report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostSummary {
    pub quarter: String,
    pub quarterly_budget_cents: u64,
    pub safety_buffer_cents: u64,
    pub spent_cents: u64,
    pub reserved_cents: u64,
    pub remaining_cents: u64,
    pub by_operation: BTreeMap<Operation, OperationTotals>,
    pub by_case: BTreeMap<String, u64>,
    pub daily_cents: BTreeMap<NaiveDate, u64>,
    pub resets_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct LedgerState {
    entries: Vec<LedgerEntry>,
    next_reservation: u64,
}

impl LedgerState {
    fn spent_in(&self, quarter: Quarter) -> u64 {
        self.entries
            .iter()
            .filter(|e| e.quarter() == quarter)
            .map(|e| e.cost_cents)
            .sum()
    }

    fn retain_quarter(&mut self, quarter: Quarter) {
        self.entries.retain(|e| e.quarter() >= quarter);
    }
}

/// Owner of the budget state.
pub struct CostLedger {
    limits: BudgetLimits,
    pricing: PricingConfig,
    store: Arc<dyn CaseStore>,
    state: Mutex<LedgerState>,
    holds: Holds,
}

impl CostLedger {
    /// Load the current quarter's ledger rows from the store.
    pub async fn load(
        limits: BudgetLimits,
        pricing: PricingConfig,
        store: Arc<dyn CaseStore>,
        now: DateTime<Utc>,
    ) -> Result<Self, BudgetError> {
        let quarter = Quarter::containing(now);
        let entries = store.ledger_entries_since(quarter.start()).await?;
        tracing::debug!(
            quarter = %quarter,
            entries = entries.len(),
            "Loaded cost ledger"
        );

        Ok(Self {
            limits,
            pricing,
            store,
            state: Mutex::new(LedgerState {
                entries,
                ..LedgerState::default()
            }),
            holds: Holds::default(),
        })
    }

    pub fn limits(&self) -> BudgetLimits {
        self.limits
    }

    pub fn pricing(&self) -> &PricingConfig {
        &self.pricing
    }

    pub fn estimated_cost(&self, operation: Operation) -> u64 {
        self.pricing.estimated_cost(operation)
    }

    fn reserved_cents(&self) -> u64 {
        lock_holds(&self.holds).values().sum()
    }

    pub async fn state(&self, now: DateTime<Utc>) -> BudgetState {
        let state = self.state.lock().await;
        BudgetState {
            limits: self.limits,
            spent_cents: state.spent_in(Quarter::containing(now)),
            reserved_cents: self.reserved_cents(),
        }
    }

    pub async fn cumulative_spend(&self, now: DateTime<Utc>) -> u64 {
        self.state
            .lock()
            .await
            .spent_in(Quarter::containing(now))
    }

    /// Book the estimated cost of `operation` if the allowance covers it.
    ///
    /// # Errors
    /// `BudgetError::InsufficientBudget` when `spent + reserved + estimate`
    /// would exceed `budget - buffer`.
    pub async fn reserve(
        &self,
        case_number: &str,
        operation: Operation,
        now: DateTime<Utc>,
    ) -> Result<Reservation, BudgetError> {
        let estimate = self.pricing.estimated_cost(operation);
        let mut state = self.state.lock().await;

        let budget = BudgetState {
            limits: self.limits,
            spent_cents: state.spent_in(Quarter::containing(now)),
            reserved_cents: self.reserved_cents(),
        };
        if !budget.can_afford(estimate) {
            return Err(BudgetError::InsufficientBudget {
                needed: estimate,
                remaining: budget.remaining_cents(),
            });
        }

        let id = state.next_reservation;
        state.next_reservation += 1;
        lock_holds(&self.holds).insert(id, estimate);

        Ok(Reservation {
            id,
            case_number: case_number.to_string(),
            operation,
            estimate_cents: estimate,
            holds: Arc::clone(&self.holds),
        })
    }

    /// Convert a reservation into a ledger row priced from the real page count.
    ///
    /// The actual cost is recorded even when it exceeds the estimate; see
    /// the module docs on overruns.
    pub async fn commit(
        &self,
        reservation: Reservation,
        pages: u32,
        now: DateTime<Utc>,
    ) -> Result<LedgerEntry, BudgetError> {
        let cost = self.pricing.cost_for_pages(pages);
        if cost > reservation.estimate_cents {
            tracing::warn!(
                case = %reservation.case_number,
                operation = %reservation.operation,
                estimate_cents = reservation.estimate_cents,
                cost_cents = cost,
                "Billed cost exceeded estimate"
            );
        }

        let entry = LedgerEntry {
            case_number: reservation.case_number.clone(),
            operation: reservation.operation,
            pages,
            cost_cents: cost,
            recorded_at: now,
        };

        let mut state = self.state.lock().await;
        let held = lock_holds(&self.holds).remove(&reservation.id);
        if held.is_none() {
            return Err(BudgetError::UnknownReservation(reservation.id));
        }
        Self::append_locked(&mut state, &*self.store, entry.clone(), now).await?;

        let allowance = self.limits.allowance_cents();
        let spent = state.spent_in(Quarter::containing(now));
        if spent > allowance {
            tracing::warn!(
                spent_cents = spent,
                allowance_cents = allowance,
                "Quarterly spend passed the allowance; further paid queries are refused"
            );
        }
        Ok(entry)
    }

    /// Give a reservation back without spending anything.
    pub fn release(&self, reservation: Reservation) {
        let held = lock_holds(&self.holds).remove(&reservation.id);
        if held.is_none() {
            tracing::warn!(
                reservation = reservation.id,
                "Released a reservation the ledger did not hold"
            );
        }
    }

    /// Append a spend that did not go through a reservation.
    ///
    /// Returns the cumulative spend for the quarter of `entry.recorded_at`.
    pub async fn record_spend(&self, entry: LedgerEntry) -> Result<u64, BudgetError> {
        let at = entry.recorded_at;
        let mut state = self.state.lock().await;
        Self::append_locked(&mut state, &*self.store, entry, at).await?;
        Ok(state.spent_in(Quarter::containing(at)))
    }

    /// The in-memory row is pushed before the store write and kept even if
    /// persistence fails, so the budget never under-counts money already spent.
    async fn append_locked(
        state: &mut LedgerState,
        store: &dyn CaseStore,
        entry: LedgerEntry,
        now: DateTime<Utc>,
    ) -> Result<(), BudgetError> {
        state.entries.push(entry.clone());
        state.retain_quarter(Quarter::containing(now));
        store.append_ledger(&entry).await.map_err(BudgetError::from)
    }

    pub async fn summary(&self, now: DateTime<Utc>) -> CostSummary {
        let quarter = Quarter::containing(now);
        let state = self.state.lock().await;

        let mut by_operation: BTreeMap<Operation, OperationTotals> = BTreeMap::new();
        let mut by_case: BTreeMap<String, u64> = BTreeMap::new();
        let mut daily_cents: BTreeMap<NaiveDate, u64> = BTreeMap::new();
        for entry in state.entries.iter().filter(|e| e.quarter() == quarter) {
            let totals = by_operation.entry(entry.operation).or_default();
            totals.queries += 1;
            totals.pages += entry.pages as u64;
            totals.cost_cents += entry.cost_cents;
            *by_case.entry(entry.case_number.clone()).or_default() += entry.cost_cents;
            *daily_cents.entry(entry.recorded_at.date_naive()).or_default() += entry.cost_cents;
        }

        let budget = BudgetState {
            limits: self.limits,
            spent_cents: state.spent_in(quarter),
            reserved_cents: self.reserved_cents(),
        };

        CostSummary {
            quarter: quarter.label(),
            quarterly_budget_cents: self.limits.quarterly_budget_cents,
            safety_buffer_cents: self.limits.safety_buffer_cents,
            spent_cents: budget.spent_cents,
            reserved_cents: budget.reserved_cents,
            remaining_cents: budget.remaining_cents(),
            by_operation,
            by_case,
            daily_cents,
            resets_at: quarter.end(),
        }
    }
}
