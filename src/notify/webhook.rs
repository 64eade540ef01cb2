//! Generic JSON webhook with optional HMAC-SHA256 body signature.
//!
//! When a secret is configured the hex digest of the exact request body is
//! sent in `X-Signature`, so receivers can verify the sender.

use super::{deliver, http_client, Notification, NotificationSink, NotifyError};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    secret: Option<String>,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, secret: Option<String>) -> Self {
        Self {
            client: http_client(),
            url: url.into(),
            secret: secret.filter(|s| !s.is_empty()),
        }
    }

    pub fn body(notification: &Notification) -> Result<Vec<u8>, NotifyError> {
        let payload = json!({
            "event": "case_update",
            "timestamp": notification.timestamp.to_rfc3339(),
            "case": {
                "number": notification.case_number,
                "court_id": notification.court_id,
                "name": notification.case_name,
                "url": notification.court_url()
            },
            "entry": {
                "number": notification.entry.entry_number,
                "date_filed": notification.entry.date_filed,
                "description": notification.entry.description,
                "document_type": notification.document_type,
                "document_url": notification.entry.document_url
            }
        });
        serde_json::to_vec(&payload).map_err(|e| NotifyError::Signing(e.to_string()))
    }

    pub fn sign(secret: &str, body: &[u8]) -> Result<String, NotifyError> {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| NotifyError::Signing(e.to_string()))?;
        mac.update(body);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

#[async_trait]
impl NotificationSink for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let body = Self::body(notification)?;
        let mut request = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json");
        if let Some(secret) = &self.secret {
            request = request.header("X-Signature", Self::sign(secret, &body)?);
        }
        deliver(request.body(body), &[200, 201, 202, 204]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::testing::notification;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_signature_matches_known_vector() {
        // RFC 4231 test case 2
        let sig = WebhookNotifier::sign("Jefe", b"what do ya want for nothing?").unwrap();
        assert_eq!(
            sig,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_body_contains_entry() {
        let n = notification(46, "JUDGMENT entered", Utc.with_ymd_and_hms(2024, 1, 15, 20, 0, 0).unwrap());
        let body: serde_json::Value =
            serde_json::from_slice(&WebhookNotifier::body(&n).unwrap()).unwrap();
        assert_eq!(body["event"], "case_update");
        assert_eq!(body["entry"]["number"], 46);
        assert_eq!(body["entry"]["document_type"], "judgment");
        assert_eq!(body["entry"]["date_filed"], "2024-01-15");
    }

    #[test]
    fn test_empty_secret_disables_signing() {
        let notifier = WebhookNotifier::new("http://localhost/hook", Some(String::new()));
        assert!(notifier.secret.is_none());
    }
}
