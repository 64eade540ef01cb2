//! Spend reporting endpoints.

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use std::sync::Arc;

use crate::budget::CostSummary;

use super::routes::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/costs", get(costs))
}

async fn costs(State(state): State<Arc<AppState>>) -> Json<CostSummary> {
    Json(state.monitor.ledger().summary(Utc::now()).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::{BudgetLimits, CostLedger, LedgerEntry, Operation, PricingConfig};
    use crate::monitor::{CaseMonitor, MonitorOptions};
    use crate::store::InMemoryCaseStore;

    #[tokio::test]
    async fn test_costs_reflect_ledger() {
        let store = Arc::new(InMemoryCaseStore::new());
        let ledger = CostLedger::load(
            BudgetLimits::default(),
            PricingConfig::default(),
            store.clone(),
            Utc::now(),
        )
        .await
        .unwrap();
        ledger
            .record_spend(LedgerEntry {
                case_number: "2:21-cv-00234".into(),
                operation: Operation::DocketCheck,
                pages: 3,
                cost_cents: 30,
                recorded_at: Utc::now(),
            })
            .await
            .unwrap();
        let monitor = CaseMonitor::new(store, Arc::new(ledger), MonitorOptions::default());
        let state = Arc::new(AppState::new(Arc::new(monitor)));

        let Json(summary) = costs(State(state)).await;
        assert_eq!(summary.spent_cents, 30);
        assert_eq!(summary.remaining_cents, 2_470);
        assert_eq!(summary.by_operation[&Operation::DocketCheck].queries, 1);
    }
}
