//! Docket data sources.
//!
//! - `FreeSource`: no-cost lookups (CourtListener/RECAP archive). Always tried first.
//! - `PaidSource`: billed queries against the court system, reached through an
//!   external bridge service. Only used when the free source has nothing newer.

mod bridge;
mod courtlistener;

pub use bridge::BridgePaidSource;
pub use courtlistener::CourtListenerSource;

use async_trait::async_trait;

use crate::budget::Transient;
use crate::case::{DocketSnapshot, MonitoredCase};

/// Error from a docket source.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceError {
    /// HTTP 429
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// HTTP 5xx
    #[error("Server error (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    /// HTTP 4xx other than 429
    #[error("Client error (HTTP {status}): {message}")]
    Client { status: u16, message: String },

    /// Connection failed or timed out
    #[error("Network error: {0}")]
    Network(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl SourceError {
    /// Classify a non-success HTTP response.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            429 => Self::RateLimited(message),
            500..=599 => Self::Server { status, message },
            _ => Self::Client { status, message },
        }
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Parse(e.to_string())
        } else if let Some(status) = e.status() {
            Self::from_status(status.as_u16(), e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}

impl Transient for SourceError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited(_) | Self::Server { .. } | Self::Network(_)
        )
    }
}

#[async_trait]
pub trait FreeSource: Send + Sync {
    fn name(&self) -> &str;

    /// `Ok(None)` when the source has no record of the case.
    async fn lookup(&self, case: &MonitoredCase) -> Result<Option<DocketSnapshot>, SourceError>;
}

#[async_trait]
pub trait PaidSource: Send + Sync {
    fn name(&self) -> &str;

    /// Fetch the full docket. The snapshot's `pages` is what gets billed.
    async fn fetch_docket(&self, case: &MonitoredCase) -> Result<DocketSnapshot, SourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(SourceError::from_status(429, "slow down").is_transient());
        assert!(SourceError::from_status(503, "unavailable").is_transient());
        assert!(!SourceError::from_status(404, "no such case").is_transient());
        assert!(!SourceError::from_status(401, "bad token").is_transient());
        assert!(!SourceError::Parse("bad json".into()).is_transient());
    }
}
