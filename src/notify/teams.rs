//! Microsoft Teams connector notifier (MessageCard payload).

use super::{deliver, http_client, truncate, Notification, NotificationSink, NotifyError};
use async_trait::async_trait;
use serde_json::{json, Value};

pub struct TeamsNotifier {
    client: reqwest::Client,
    webhook_url: String,
}

impl TeamsNotifier {
    pub fn new(webhook_url: impl Into<String>) -> Self {
        Self {
            client: http_client(),
            webhook_url: webhook_url.into(),
        }
    }

    pub fn payload(notification: &Notification) -> Value {
        json!({
            "@type": "MessageCard",
            "@context": "http://schema.org/extensions",
            "themeColor": "0066CC",
            "summary": format!("New activity in case {}", notification.case_number),
            "sections": [
                {
                    "activityTitle": "New Court Activity",
                    "activitySubtitle": notification
                        .case_name
                        .clone()
                        .unwrap_or_else(|| "Federal Court Case".to_string()),
                    "facts": [
                        {"name": "Case Number:", "value": notification.case_number},
                        {"name": "Court:", "value": notification.court_id.to_uppercase()},
                        {"name": "Type:", "value": notification.document_type.as_str()}
                    ]
                },
                {
                    "title": notification.entry_heading(),
                    "text": truncate(&notification.entry.description, 150)
                }
            ],
            "potentialAction": [{
                "@type": "OpenUri",
                "name": "View on PACER",
                "targets": [{"os": "default", "uri": notification.court_url()}]
            }]
        })
    }
}

#[async_trait]
impl NotificationSink for TeamsNotifier {
    fn name(&self) -> &str {
        "teams"
    }

    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let request = self
            .client
            .post(&self.webhook_url)
            .json(&Self::payload(notification));
        deliver(request, &[200]).await
    }
}
