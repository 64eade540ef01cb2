//! Paid docket queries through an external bridge service.
//!
//! The bridge owns the court-site login and report parsing. It accepts
//! `POST {base}/docket` with `{"court_id", "case_number"}` and answers with
//! the parsed entries and the number of pages the court billed.

use super::{PaidSource, SourceError};
use crate::case::{DocketEntry, DocketSnapshot, MonitoredCase};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize)]
struct DocketRequest<'a> {
    court_id: &'a str,
    case_number: &'a str,
}

#[derive(Debug, Deserialize)]
struct DocketResponse {
    #[serde(default)]
    entries: Vec<DocketEntry>,
    /// Billable pages; the court bills at least one page per report
    #[serde(default = "one")]
    pages: u32,
    #[serde(default)]
    as_of: Option<DateTime<Utc>>,
}

fn one() -> u32 {
    1
}

pub struct BridgePaidSource {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl BridgePaidSource {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

#[async_trait]
impl PaidSource for BridgePaidSource {
    fn name(&self) -> &str {
        "pacer-bridge"
    }

    async fn fetch_docket(&self, case: &MonitoredCase) -> Result<DocketSnapshot, SourceError> {
        let mut request = self
            .client
            .post(format!("{}/docket", self.base_url))
            .json(&DocketRequest {
                court_id: &case.court_id,
                case_number: &case.case_number,
            });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::from_status(status.as_u16(), body));
        }

        let parsed: DocketResponse = response.json().await?;
        Ok(DocketSnapshot {
            entries: parsed.entries,
            pages: parsed.pages.max(1),
            as_of: parsed.as_of.unwrap_or_else(Utc::now),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_defaults() {
        let parsed: DocketResponse = serde_json::from_str(
            r#"{"entries": [{"entry_number": 7, "description": "NOTICE of Appearance"}]}"#,
        )
        .unwrap();
        assert_eq!(parsed.pages, 1);
        assert_eq!(parsed.entries[0].entry_number, 7);
        assert!(parsed.as_of.is_none());
    }
}
