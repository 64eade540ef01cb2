//! Quarterly budget arithmetic.
//!
//! # Invariants
//! - `spent_cents + reserved_cents <= allowance_cents()` for every query the
//!   scheduler authorizes
//! - `allowance_cents() == quarterly_budget_cents - safety_buffer_cents`

use serde::{Deserialize, Serialize};

use crate::store::StoreError;

/// Configured quarterly ceiling and the margin withheld from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetLimits {
    /// Quarterly budget ceiling (in cents)
    pub quarterly_budget_cents: u64,
    /// Margin kept unspent so the account never crosses into the billed tier (in cents)
    pub safety_buffer_cents: u64,
}

impl BudgetLimits {
    pub fn new(quarterly_budget_cents: u64, safety_buffer_cents: u64) -> Self {
        Self {
            quarterly_budget_cents,
            safety_buffer_cents,
        }
    }

    /// What the scheduler may spend this quarter.
    ///
    /// # Property
    /// `allowance_cents() == quarterly_budget_cents - safety_buffer_cents` (saturating)
    pub fn allowance_cents(&self) -> u64 {
        self.quarterly_budget_cents
            .saturating_sub(self.safety_buffer_cents)
    }
}

impl Default for BudgetLimits {
    /// $30 quarterly waiver with a $5 buffer.
    fn default() -> Self {
        Self::new(3_000, 500)
    }
}

/// Budget position for the current quarter.
///
/// `spent_cents` is derived from the ledger, never set directly; see
/// `CostLedger::state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetState {
    pub limits: BudgetLimits,
    /// Sum of ledger entries in the current quarter
    pub spent_cents: u64,
    /// Estimates held by in-flight paid queries
    pub reserved_cents: u64,
}

impl BudgetState {
    pub fn new(limits: BudgetLimits, spent_cents: u64) -> Self {
        Self {
            limits,
            spent_cents,
            reserved_cents: 0,
        }
    }

    /// Allowance left after spend and reservations.
    pub fn remaining_cents(&self) -> u64 {
        self.limits
            .allowance_cents()
            .saturating_sub(self.spent_cents)
            .saturating_sub(self.reserved_cents)
    }

    /// Check if a query of the given estimated cost fits in the allowance.
    ///
    /// # Returns
    /// `true` iff `spent + reserved + estimated_cost <= budget - buffer`
    pub fn can_afford(&self, estimated_cost_cents: u64) -> bool {
        self.spent_cents
            .saturating_add(self.reserved_cents)
            .saturating_add(estimated_cost_cents)
            <= self.limits.allowance_cents()
    }
}

/// Errors related to budget operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BudgetError {
    #[error("Insufficient budget: need {needed} cents, have {remaining} cents")]
    InsufficientBudget { needed: u64, remaining: u64 },

    #[error("Unknown reservation {0}")]
    UnknownReservation(u64),

    #[error("Ledger persistence failed: {0}")]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boundary_rejects_overshoot() {
        // budget $30, buffer $5, spent $24, next query $3: 27 > 25
        let state = BudgetState::new(BudgetLimits::new(3_000, 500), 2_400);
        assert!(!state.can_afford(300));
        assert_eq!(state.remaining_cents(), 100);
    }

    #[test]
    fn test_boundary_allows_exact_fit() {
        let state = BudgetState::new(BudgetLimits::new(3_000, 500), 2_200);
        assert!(state.can_afford(300));
        assert!(!state.can_afford(301));
    }

    #[test]
    fn test_reservations_count_against_allowance() {
        let mut state = BudgetState::new(BudgetLimits::new(3_000, 500), 2_000);
        assert!(state.can_afford(300));
        state.reserved_cents = 300;
        assert!(state.can_afford(200));
        assert!(!state.can_afford(201));
        assert_eq!(state.remaining_cents(), 200);
    }

    #[test]
    fn test_buffer_larger_than_budget() {
        let state = BudgetState::new(BudgetLimits::new(100, 500), 0);
        assert_eq!(state.limits.allowance_cents(), 0);
        assert!(state.can_afford(0));
        assert!(!state.can_afford(1));
    }
}
