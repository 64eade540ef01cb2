//! CourtListener REST client (free RECAP archive).

use super::{FreeSource, SourceError};
use crate::case::{DocketEntry, DocketSnapshot, MonitoredCase};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

const DEFAULT_BASE_URL: &str = "https://www.courtlistener.com/api/rest/v4";

/// How long a lookup result (including "not found") is reused.
const CACHE_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    results: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct Docket {
    id: u64,
    #[serde(default)]
    date_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    #[serde(default)]
    entry_number: Option<u32>,
    #[serde(default)]
    date_filed: Option<NaiveDate>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    recap_documents: Vec<RecapDocument>,
}

#[derive(Debug, Deserialize)]
struct RecapDocument {
    #[serde(default)]
    filepath_local: Option<String>,
    #[serde(default)]
    description: String,
}

impl Entry {
    fn into_docket_entry(self) -> Option<DocketEntry> {
        let entry_number = self.entry_number?;
        let description = if self.description.is_empty() {
            self.recap_documents
                .first()
                .map(|d| d.description.clone())
                .unwrap_or_default()
        } else {
            self.description
        };
        let document_url = self
            .recap_documents
            .into_iter()
            .find_map(|d| d.filepath_local)
            .map(|path| format!("https://storage.courtlistener.com/{}", path));

        Some(DocketEntry {
            entry_number,
            date_filed: self.date_filed,
            description,
            document_url,
        })
    }
}

pub struct CourtListenerSource {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    cache: RwLock<HashMap<String, (Instant, Option<DocketSnapshot>)>>,
}

impl CourtListenerSource {
    pub fn new(token: Option<String>) -> Self {
        Self::with_base_url(DEFAULT_BASE_URL, token)
    }

    pub fn with_base_url(base_url: impl Into<String>, token: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("docket-monitor/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn cache_key(case: &MonitoredCase) -> String {
        format!("courtlistener:{}:{}", case.court_id, case.case_number)
    }

    async fn get<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, SourceError> {
        let mut request = self
            .client
            .get(format!("{}/{}", self.base_url, path))
            .query(query);
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Token {}", token));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::from_status(status.as_u16(), body));
        }
        Ok(response.json::<T>().await?)
    }

    async fn fetch(&self, case: &MonitoredCase) -> Result<Option<DocketSnapshot>, SourceError> {
        let dockets: Page<Docket> = self
            .get(
                "dockets/",
                &[
                    ("court", case.court_id.clone()),
                    ("docket_number", case.case_number.clone()),
                ],
            )
            .await?;
        let Some(docket) = dockets.results.into_iter().next() else {
            return Ok(None);
        };

        let entries: Page<Entry> = self
            .get(
                "docket-entries/",
                &[
                    ("docket", docket.id.to_string()),
                    ("order_by", "-entry_number".to_string()),
                ],
            )
            .await?;

        Ok(Some(DocketSnapshot {
            entries: entries
                .results
                .into_iter()
                .filter_map(Entry::into_docket_entry)
                .collect(),
            pages: 0,
            as_of: docket.date_modified.unwrap_or_else(Utc::now),
        }))
    }
}

#[async_trait]
impl FreeSource for CourtListenerSource {
    fn name(&self) -> &str {
        "courtlistener"
    }

    async fn lookup(&self, case: &MonitoredCase) -> Result<Option<DocketSnapshot>, SourceError> {
        let key = Self::cache_key(case);
        if let Some((fetched_at, cached)) = self.cache.read().await.get(&key) {
            if fetched_at.elapsed() < CACHE_TTL {
                tracing::debug!(case = %case.case_number, "CourtListener cache hit");
                return Ok(cached.clone());
            }
        }

        let snapshot = self.fetch(case).await?;
        let mut cache = self.cache.write().await;
        cache.retain(|_, (fetched_at, _)| fetched_at.elapsed() < CACHE_TTL);
        cache.insert(key, (Instant::now(), snapshot.clone()));
        Ok(snapshot)
    }
}
