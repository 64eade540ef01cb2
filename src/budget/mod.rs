//! Budget module - fee estimation, the quarterly cost ledger, and retries.
//!
//! # Key Concepts
//! - Budget: quarterly allowance arithmetic (`budget - buffer`)
//! - Pricing: per-page fees and per-operation estimates
//! - Ledger: the owned, lock-protected record of every billed query
//! - Retry: bounded retries for transient paid-query failures

mod budget;
mod ledger;
mod pricing;
mod retry;

pub use budget::{BudgetError, BudgetLimits, BudgetState};
pub use ledger::{CostLedger, CostSummary, LedgerEntry, OperationTotals, Quarter, Reservation};
pub use pricing::{Operation, PageEstimates, PricingConfig};
pub use retry::{RetryPolicy, Transient};
