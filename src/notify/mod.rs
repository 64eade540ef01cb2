//! Notification delivery for new docket activity.
//!
//! Every sink implements `NotificationSink`. `NotificationManager` fans one
//! notification out to all configured sinks, and `NotificationGate` sits in
//! front of it to drop filtered document types and enforce a rate limit.

mod discord;
mod gate;
mod slack;
mod teams;
mod webhook;

pub use discord::DiscordNotifier;
pub use gate::{GateDecision, NotificationGate, RateLimit};
pub use slack::SlackNotifier;
pub use teams::TeamsNotifier;
pub use webhook::WebhookNotifier;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::case::{DocketEntry, DocumentType, MonitoredCase};

#[derive(Debug, Clone, thiserror::Error)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Endpoint rejected notification (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("All {0} notification sinks failed")]
    AllFailed(usize),
}

impl From<reqwest::Error> for NotifyError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.to_string())
    }
}

/// One new docket entry worth telling someone about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub case_number: String,
    pub court_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_name: Option<String>,
    pub document_type: DocumentType,
    pub entry: DocketEntry,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    pub fn for_entry(case: &MonitoredCase, entry: DocketEntry, timestamp: DateTime<Utc>) -> Self {
        Self {
            case_number: case.case_number.clone(),
            court_id: case.court_id.clone(),
            case_name: case.case_name.clone(),
            document_type: entry.document_type(),
            entry,
            timestamp,
        }
    }

    /// Link to the court's CM/ECF site.
    pub fn court_url(&self) -> String {
        format!("https://ecf.{}.uscourts.gov", self.court_id)
    }

    /// `Entry #45 - 2024-01-15`
    pub fn entry_heading(&self) -> String {
        match self.entry.date_filed {
            Some(date) => format!("Entry #{} - {}", self.entry.entry_number, date),
            None => format!("Entry #{}", self.entry.entry_number),
        }
    }
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Shorten to at most `max` characters, marking the cut with an ellipsis.
pub(crate) fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{}...", cut.trim_end())
    }
}

/// Send a prepared request and map non-accepted statuses to `NotifyError::Rejected`.
pub(crate) async fn deliver(
    request: reqwest::RequestBuilder,
    accepted: &[u16],
) -> Result<(), NotifyError> {
    let response = request.send().await?;
    let status = response.status().as_u16();
    if accepted.contains(&status) {
        Ok(())
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(NotifyError::Rejected { status, body })
    }
}

pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .user_agent(concat!("docket-monitor/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_default()
}

/// Fans notifications out to every configured sink.
#[derive(Default)]
pub struct NotificationManager {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl NotificationManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn add_sink(&mut self, sink: Arc<dyn NotificationSink>) {
        self.sinks.push(sink);
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// Deliver to all sinks, returning `(sink name, succeeded)` for each.
    pub async fn notify_all(&self, notification: &Notification) -> Vec<(String, bool)> {
        let sends = self.sinks.iter().map(|sink| async move {
            let ok = match sink.send(notification).await {
                Ok(()) => {
                    tracing::info!(
                        sink = sink.name(),
                        case = %notification.case_number,
                        entry = notification.entry.entry_number,
                        "Sent notification"
                    );
                    true
                }
                Err(e) => {
                    tracing::error!(
                        sink = sink.name(),
                        case = %notification.case_number,
                        "Notification failed: {}",
                        e
                    );
                    false
                }
            };
            (sink.name().to_string(), ok)
        });
        futures::future::join_all(sends).await
    }
}

#[async_trait]
impl NotificationSink for NotificationManager {
    fn name(&self) -> &str {
        "manager"
    }

    /// Succeeds if at least one sink accepted the notification.
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        if self.sinks.is_empty() {
            return Ok(());
        }
        let results = self.notify_all(notification).await;
        if results.iter().any(|(_, ok)| *ok) {
            Ok(())
        } else {
            Err(NotifyError::AllFailed(results.len()))
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_truncate_is_char_safe() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("ORDER granting motion", 5), "ORDER...");
        assert_eq!(truncate("§§§§§§", 3), "§§§...");
    }

    #[test]
    fn test_links_and_heading() {
        let n = notification(45, "ORDER", Utc.with_ymd_and_hms(2024, 1, 15, 20, 0, 0).unwrap());
        assert_eq!(n.court_url(), "https://ecf.txed.uscourts.gov");
        assert_eq!(n.entry_heading(), "Entry #45 - 2024-01-15");
    }

    #[tokio::test]
    async fn test_manager_succeeds_if_any_sink_succeeds() {
        let ok = Arc::new(RecordingSink::default());
        let manager = NotificationManager::new()
            .with_sink(Arc::new(RecordingSink::failing()))
            .with_sink(ok.clone());

        let n = notification(45, "ORDER", Utc.with_ymd_and_hms(2024, 1, 15, 20, 0, 0).unwrap());
        let results = manager.notify_all(&n).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results.iter().filter(|(_, ok)| *ok).count(), 1);
        assert!(manager.send(&n).await.is_ok());
        assert_eq!(ok.sent.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn test_manager_fails_when_all_sinks_fail() {
        let manager = NotificationManager::new().with_sink(Arc::new(RecordingSink::failing()));
        let n = notification(45, "ORDER", Utc.with_ymd_and_hms(2024, 1, 15, 20, 0, 0).unwrap());
        assert!(matches!(
            manager.send(&n).await,
            Err(NotifyError::AllFailed(1))
        ));
    }
}
