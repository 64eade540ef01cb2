//! Monitored cases, docket entries, and change fingerprints.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Polling-frequency tier for a monitored case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    /// Sort key: high first.
    pub fn rank(&self) -> u8 {
        match self {
            Self::High => 0,
            Self::Medium => 1,
            Self::Low => 2,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::Medium
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown priority '{0}' (expected high, medium or low)")]
pub struct ParsePriorityError(pub String);

impl FromStr for Priority {
    type Err = ParsePriorityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            other => Err(ParsePriorityError(other.to_string())),
        }
    }
}

/// A case under watch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoredCase {
    pub case_number: String,
    /// Court identifier (e.g. "nysd", "cacd")
    pub court_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_name: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default = "default_true")]
    pub notifications_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checked: Option<DateTime<Utc>>,
    /// When new docket activity was last seen
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    /// SHA-256 of the last docket we saw (hex)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

fn default_true() -> bool {
    true
}

impl MonitoredCase {
    pub fn new(case_number: impl Into<String>, court_id: impl Into<String>, priority: Priority) -> Self {
        Self {
            case_number: case_number.into(),
            court_id: court_id.into().to_ascii_lowercase(),
            case_name: None,
            priority,
            notifications_enabled: true,
            last_checked: None,
            last_updated: None,
            fingerprint: None,
        }
    }
}

/// A single docket entry as reported by a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocketEntry {
    pub entry_number: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_filed: Option<NaiveDate>,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_url: Option<String>,
}

impl DocketEntry {
    pub fn document_type(&self) -> DocumentType {
        DocumentType::classify(&self.description)
    }
}

/// What a source returned for one case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocketSnapshot {
    pub entries: Vec<DocketEntry>,
    /// Billable pages the query consumed (0 for free sources)
    pub pages: u32,
    /// Point in time the data reflects
    pub as_of: DateTime<Utc>,
}

impl DocketSnapshot {
    /// Whether this snapshot is newer than the last time we checked the case.
    pub fn is_fresher_than(&self, last_checked: Option<DateTime<Utc>>) -> bool {
        match last_checked {
            Some(checked) => self.as_of > checked,
            None => true,
        }
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(&self.entries)
    }
}

/// Hex SHA-256 over the entries, independent of the order the source listed them in.
pub fn fingerprint(entries: &[DocketEntry]) -> String {
    let mut sorted: Vec<&DocketEntry> = entries.iter().collect();
    sorted.sort_by_key(|e| e.entry_number);

    let mut hasher = Sha256::new();
    for entry in sorted {
        hasher.update(entry.entry_number.to_be_bytes());
        if let Some(date) = entry.date_filed {
            hasher.update(date.to_string().as_bytes());
        }
        hasher.update([0u8]);
        hasher.update(entry.description.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

/// Coarse classification of a docket entry, used for notification filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Order,
    Motion,
    Judgment,
    Notice,
    Complaint,
    Other,
}

impl DocumentType {
    /// Classify by the leading keywords of a docket text.
    ///
    /// Docket texts lead with the document kind ("ORDER granting ...",
    /// "MOTION to Dismiss ..."), so the earliest keyword wins.
    pub fn classify(description: &str) -> Self {
        let lower = description.to_ascii_lowercase();
        let candidates = [
            ("judgment", Self::Judgment),
            ("order", Self::Order),
            ("motion", Self::Motion),
            ("notice", Self::Notice),
            ("complaint", Self::Complaint),
        ];

        candidates
            .iter()
            .filter_map(|(keyword, kind)| lower.find(keyword).map(|pos| (pos, *kind)))
            .min_by_key(|(pos, _)| *pos)
            .map(|(_, kind)| kind)
            .unwrap_or(Self::Other)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Order => "order",
            Self::Motion => "motion",
            Self::Judgment => "judgment",
            Self::Notice => "notice",
            Self::Complaint => "complaint",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "order" => Ok(Self::Order),
            "motion" => Ok(Self::Motion),
            "judgment" => Ok(Self::Judgment),
            "notice" => Ok(Self::Notice),
            "complaint" => Ok(Self::Complaint),
            "other" => Ok(Self::Other),
            other => Err(format!("Unknown document type '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(n: u32, text: &str) -> DocketEntry {
        DocketEntry {
            entry_number: n,
            date_filed: NaiveDate::from_ymd_opt(2024, 1, 15),
            description: text.to_string(),
            document_url: None,
        }
    }

    #[test]
    fn test_priority_parse() {
        assert_eq!("HIGH".parse::<Priority>().unwrap(), Priority::High);
        assert_eq!(" low ".parse::<Priority>().unwrap(), Priority::Low);
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn test_fingerprint_ignores_order() {
        let a = vec![entry(1, "COMPLAINT"), entry(2, "ORDER")];
        let b = vec![entry(2, "ORDER"), entry(1, "COMPLAINT")];
        assert_eq!(fingerprint(&a), fingerprint(&b));

        let c = vec![entry(1, "COMPLAINT"), entry(2, "ORDER amended")];
        assert_ne!(fingerprint(&a), fingerprint(&c));
    }

    #[test]
    fn test_classify_document_type() {
        assert_eq!(
            DocumentType::classify("ORDER granting Motion for Summary Judgment"),
            DocumentType::Order
        );
        assert_eq!(
            DocumentType::classify("MOTION to Dismiss for Lack of Jurisdiction"),
            DocumentType::Motion
        );
        assert_eq!(
            DocumentType::classify("JUDGMENT entered in favor of Plaintiff"),
            DocumentType::Judgment
        );
        assert_eq!(
            DocumentType::classify("Minute Entry for proceedings held"),
            DocumentType::Other
        );
    }

    #[test]
    fn test_snapshot_freshness() {
        let checked = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let snapshot = DocketSnapshot {
            entries: vec![],
            pages: 0,
            as_of: checked,
        };
        assert!(!snapshot.is_fresher_than(Some(checked)));
        assert!(snapshot.is_fresher_than(Some(checked - chrono::Duration::minutes(1))));
        assert!(snapshot.is_fresher_than(None));
    }
}
