//! Document-type filter and sliding-window rate limit in front of a sink.

use super::{Notification, NotificationSink, NotifyError};
use crate::case::DocumentType;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

/// At most `max` deliveries in any `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub max: usize,
    pub window: Duration,
}

impl RateLimit {
    pub fn per_hour(max: usize) -> Self {
        Self {
            max,
            window: Duration::hours(1),
        }
    }
}

/// What happened to a submitted notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateDecision {
    Delivered,
    /// Document type not in the allow list
    Filtered,
    RateLimited,
}

pub struct NotificationGate {
    sink: Arc<dyn NotificationSink>,
    /// Empty means every type is allowed
    allowed_types: HashSet<DocumentType>,
    rate_limit: Option<RateLimit>,
    delivered_at: Mutex<VecDeque<DateTime<Utc>>>,
}

impl NotificationGate {
    pub fn new(
        sink: Arc<dyn NotificationSink>,
        allowed_types: impl IntoIterator<Item = DocumentType>,
        rate_limit: Option<RateLimit>,
    ) -> Self {
        Self {
            sink,
            allowed_types: allowed_types.into_iter().collect(),
            rate_limit,
            delivered_at: Mutex::new(VecDeque::new()),
        }
    }

    pub fn allows(&self, document_type: DocumentType) -> bool {
        self.allowed_types.is_empty() || self.allowed_types.contains(&document_type)
    }

    /// Filter, rate-limit, then deliver.
    ///
    /// The notification's own timestamp drives the sliding window. A slot is
    /// claimed before delivery and given back if the sink fails, so failed
    /// sends do not eat into the limit.
    pub async fn submit(&self, notification: &Notification) -> Result<GateDecision, NotifyError> {
        if !self.allows(notification.document_type) {
            tracing::debug!(
                case = %notification.case_number,
                document_type = %notification.document_type,
                "Notification filtered by document type"
            );
            return Ok(GateDecision::Filtered);
        }

        let at = notification.timestamp;
        if let Some(limit) = self.rate_limit {
            let mut delivered = self.delivered_at.lock().await;
            while delivered.front().is_some_and(|t| *t <= at - limit.window) {
                delivered.pop_front();
            }
            if delivered.len() >= limit.max {
                tracing::warn!(
                    case = %notification.case_number,
                    limit = limit.max,
                    "Notification rate limit reached, dropping"
                );
                return Ok(GateDecision::RateLimited);
            }
            delivered.push_back(at);
        }

        if let Err(e) = self.sink.send(notification).await {
            if self.rate_limit.is_some() {
                let mut delivered = self.delivered_at.lock().await;
                if let Some(pos) = delivered.iter().rposition(|t| *t == at) {
                    delivered.remove(pos);
                }
            }
            return Err(e);
        }
        Ok(GateDecision::Delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::testing::{notification, RecordingSink};
    use chrono::TimeZone;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 20, 0, 0).unwrap() + Duration::minutes(minute as i64)
    }

    #[tokio::test]
    async fn test_filter_drops_unlisted_types() {
        let sink = Arc::new(RecordingSink::default());
        let gate = NotificationGate::new(
            sink.clone(),
            [DocumentType::Order, DocumentType::Judgment],
            None,
        );

        let order = notification(1, "ORDER granting motion", at(0));
        let motion = notification(2, "MOTION to compel", at(1));
        assert_eq!(gate.submit(&order).await.unwrap(), GateDecision::Delivered);
        assert_eq!(gate.submit(&motion).await.unwrap(), GateDecision::Filtered);
        assert_eq!(sink.sent.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_filter_allows_everything() {
        let gate = NotificationGate::new(Arc::new(RecordingSink::default()), [], None);
        assert!(gate.allows(DocumentType::Other));
        assert!(gate.allows(DocumentType::Motion));
    }

    #[tokio::test]
    async fn test_rate_limit_slides() {
        let sink = Arc::new(RecordingSink::default());
        let gate = NotificationGate::new(sink.clone(), [], Some(RateLimit::per_hour(2)));

        assert_eq!(gate.submit(&notification(1, "ORDER", at(0))).await.unwrap(), GateDecision::Delivered);
        assert_eq!(gate.submit(&notification(2, "ORDER", at(10))).await.unwrap(), GateDecision::Delivered);
        assert_eq!(gate.submit(&notification(3, "ORDER", at(20))).await.unwrap(), GateDecision::RateLimited);
        // First delivery ages out of the window
        assert_eq!(gate.submit(&notification(4, "ORDER", at(60))).await.unwrap(), GateDecision::Delivered);
        assert_eq!(sink.sent.lock().await.len(), 3);
    }

    #[tokio::test]
    async fn test_failed_delivery_returns_slot() {
        let gate = NotificationGate::new(
            Arc::new(RecordingSink::failing()),
            [],
            Some(RateLimit::per_hour(1)),
        );
        assert!(gate.submit(&notification(1, "ORDER", at(0))).await.is_err());
        assert!(gate.submit(&notification(2, "ORDER", at(1))).await.is_err());
        assert!(gate.delivered_at.lock().await.is_empty());
    }
}
