//! Slack incoming-webhook notifier (Block Kit payload).

use super::{deliver, http_client, truncate, Notification, NotificationSink, NotifyError};
use async_trait::async_trait;
use serde_json::{json, Value};

pub struct SlackNotifier {
    client: reqwest::Client,
    webhook_url: String,
}

impl SlackNotifier {
    pub fn new(webhook_url: impl Into<String>) -> Self {
        Self {
            client: http_client(),
            webhook_url: webhook_url.into(),
        }
    }

    pub fn payload(notification: &Notification) -> Value {
        let mut blocks = vec![
            json!({
                "type": "header",
                "text": {"type": "plain_text", "text": "New Court Activity"}
            }),
            json!({
                "type": "section",
                "fields": [
                    {"type": "mrkdwn", "text": format!("*Case:*\n{}", notification.case_number)},
                    {"type": "mrkdwn", "text": format!("*Court:*\n{}", notification.court_id.to_uppercase())}
                ]
            }),
        ];

        if let Some(name) = &notification.case_name {
            blocks.push(json!({
                "type": "section",
                "text": {"type": "mrkdwn", "text": format!("*{}*", name)}
            }));
        }

        blocks.push(json!({
            "type": "section",
            "text": {
                "type": "mrkdwn",
                "text": format!(
                    "*{}*\n{}",
                    notification.entry_heading(),
                    truncate(&notification.entry.description, 100)
                )
            }
        }));
        blocks.push(json!({
            "type": "actions",
            "elements": [{
                "type": "button",
                "text": {"type": "plain_text", "text": "View on PACER"},
                "url": notification.court_url()
            }]
        }));

        json!({
            "text": format!("New {} in {}", notification.document_type, notification.case_number),
            "blocks": blocks
        })
    }
}

#[async_trait]
impl NotificationSink for SlackNotifier {
    fn name(&self) -> &str {
        "slack"
    }

    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let request = self
            .client
            .post(&self.webhook_url)
            .json(&Self::payload(notification));
        deliver(request, &[200]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::testing::notification;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_payload_shape() {
        let n = notification(
            45,
            "ORDER granting Motion for Summary Judgment",
            Utc.with_ymd_and_hms(2024, 1, 15, 20, 0, 0).unwrap(),
        );
        let payload = SlackNotifier::payload(&n);
        let blocks = payload["blocks"].as_array().unwrap();

        assert_eq!(blocks[0]["type"], "header");
        assert_eq!(blocks[1]["fields"][1]["text"], "*Court:*\nTXED");
        assert!(blocks[2]["text"]["text"]
            .as_str()
            .unwrap()
            .starts_with("*Entry #45 - 2024-01-15*"));
        assert_eq!(payload["text"], "New order in 2:21-cv-00234");
    }
}
