//! Discord webhook notifier (embed payload).

use super::{deliver, http_client, truncate, Notification, NotificationSink, NotifyError};
use async_trait::async_trait;
use serde_json::{json, Value};

const EMBED_COLOR: u32 = 0x0066CC;

pub struct DiscordNotifier {
    client: reqwest::Client,
    webhook_url: String,
}

impl DiscordNotifier {
    pub fn new(webhook_url: impl Into<String>) -> Self {
        Self {
            client: http_client(),
            webhook_url: webhook_url.into(),
        }
    }

    pub fn payload(notification: &Notification) -> Value {
        let mut embed = json!({
            "title": "New Court Activity",
            "color": EMBED_COLOR,
            "url": notification.court_url(),
            "fields": [
                {"name": "Case Number", "value": notification.case_number, "inline": true},
                {"name": "Court", "value": notification.court_id.to_uppercase(), "inline": true},
                {"name": "Type", "value": notification.document_type.as_str(), "inline": true},
                {
                    "name": notification.entry_heading(),
                    "value": truncate(&notification.entry.description, 200),
                    "inline": false
                }
            ],
            "timestamp": notification.timestamp.to_rfc3339()
        });
        if let Some(name) = &notification.case_name {
            embed["description"] = json!(format!("**{}**", name));
        }

        json!({
            "username": "Docket Monitor",
            "embeds": [embed]
        })
    }
}

#[async_trait]
impl NotificationSink for DiscordNotifier {
    fn name(&self) -> &str {
        "discord"
    }

    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let request = self
            .client
            .post(&self.webhook_url)
            .query(&[("wait", "true")])
            .json(&Self::payload(notification));
        deliver(request, &[200, 204]).await
    }
}
