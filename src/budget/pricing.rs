//! Per-page fee schedule and cost estimates.
//!
//! Fees are integer cents: pages × per-page rate, capped per document.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of billable query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    DocketCheck,
    DocumentDownload,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DocketCheck => "docket_check",
            Self::DocumentDownload => "document_download",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "docket_check" => Ok(Self::DocketCheck),
            "document_download" => Ok(Self::DocumentDownload),
            other => Err(format!("Unknown operation '{}'", other)),
        }
    }
}

/// Expected page count per operation, used before the real count is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageEstimates {
    pub docket_check: u32,
    pub document_download: u32,
}

impl Default for PageEstimates {
    fn default() -> Self {
        Self {
            docket_check: 3,
            document_download: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    /// Fee per billable page (in cents)
    pub per_page_cents: u64,
    /// Fee ceiling for any single document or report (in cents)
    pub max_document_cents: u64,
    pub page_estimates: PageEstimates,
}

impl Default for PricingConfig {
    /// $0.10 per page, $3.00 cap.
    fn default() -> Self {
        Self {
            per_page_cents: 10,
            max_document_cents: 300,
            page_estimates: PageEstimates::default(),
        }
    }
}

impl PricingConfig {
    pub fn estimated_pages(&self, operation: Operation) -> u32 {
        match operation {
            Operation::DocketCheck => self.page_estimates.docket_check,
            Operation::DocumentDownload => self.page_estimates.document_download,
        }
    }

    /// Fee for a query that billed `pages` pages.
    ///
    /// # Postcondition
    /// `result <= max_document_cents`
    pub fn cost_for_pages(&self, pages: u32) -> u64 {
        (pages as u64)
            .saturating_mul(self.per_page_cents)
            .min(self.max_document_cents)
    }

    /// Fee expected for an operation before it runs.
    pub fn estimated_cost(&self, operation: Operation) -> u64 {
        self.cost_for_pages(self.estimated_pages(operation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimated_cost_uses_page_estimates() {
        let pricing = PricingConfig::default();
        assert_eq!(pricing.estimated_cost(Operation::DocketCheck), 30);
        assert_eq!(pricing.estimated_cost(Operation::DocumentDownload), 100);
    }

    #[test]
    fn test_cost_is_capped_per_document() {
        let pricing = PricingConfig::default();
        assert_eq!(pricing.cost_for_pages(29), 290);
        assert_eq!(pricing.cost_for_pages(30), 300);
        assert_eq!(pricing.cost_for_pages(250), 300);
        assert_eq!(pricing.cost_for_pages(0), 0);
    }

    #[test]
    fn test_cap_applies_to_estimates() {
        let pricing = PricingConfig {
            page_estimates: PageEstimates {
                docket_check: 3,
                document_download: 80,
            },
            ..PricingConfig::default()
        };
        assert_eq!(pricing.estimated_cost(Operation::DocumentDownload), 300);
    }

    #[test]
    fn test_operation_round_trips_through_str() {
        for op in [Operation::DocketCheck, Operation::DocumentDownload] {
            assert_eq!(op.as_str().parse::<Operation>().unwrap(), op);
        }
    }
}
