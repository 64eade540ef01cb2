//! When a case may be polled.
//!
//! Two independent gates:
//! - `PollIntervals::is_due`: enough time has passed since the last check
//!   for the case's priority tier
//! - `PollWindow::is_within_allowed_window`: the local wall-clock hour is inside the
//!   configured off-peak window (which may wrap past midnight)

use crate::case::{MonitoredCase, Priority};
use chrono::{DateTime, Duration, FixedOffset, Offset, Timelike, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Re-check interval per priority tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollIntervals {
    pub high_secs: u64,
    pub medium_secs: u64,
    pub low_secs: u64,
    /// Random spread applied to each interval, as a fraction (0.1 = ±10%).
    #[serde(default)]
    pub jitter: f64,
}

impl Default for PollIntervals {
    fn default() -> Self {
        Self {
            high_secs: 60 * 60,
            medium_secs: 6 * 60 * 60,
            low_secs: 24 * 60 * 60,
            jitter: 0.0,
        }
    }
}

impl PollIntervals {
    pub fn interval_for(&self, priority: Priority) -> Duration {
        let secs = match priority {
            Priority::High => self.high_secs,
            Priority::Medium => self.medium_secs,
            Priority::Low => self.low_secs,
        };
        Duration::seconds(secs as i64)
    }

    /// True if the case has never been checked, or if at least the priority
    /// interval has elapsed since it was.
    pub fn is_due(&self, case: &MonitoredCase, now: DateTime<Utc>) -> bool {
        let Some(last_checked) = case.last_checked else {
            return true;
        };

        let mut interval = self.interval_for(case.priority);
        if self.jitter > 0.0 {
            let spread = self.jitter.min(1.0);
            let factor = 1.0 + rand::thread_rng().gen_range(-spread..=spread);
            interval = Duration::milliseconds((interval.num_milliseconds() as f64 * factor) as i64);
        }

        now - last_checked >= interval
    }
}

/// Allowed polling hours in a fixed-offset local time zone.
///
/// `start_hour` is inclusive and `end_hour` exclusive. A window whose start is
/// after its end wraps across midnight (18 -> 6 covers 18:00..24:00 and
/// 00:00..06:00). Equal start and end leaves polling unrestricted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollWindow {
    pub start_hour: u32,
    pub end_hour: u32,
    /// Offset of local time from UTC, in hours (e.g. -6 for US Central standard time)
    #[serde(default)]
    pub utc_offset_hours: i32,
}

impl Default for PollWindow {
    fn default() -> Self {
        Self {
            start_hour: 18,
            end_hour: 6,
            utc_offset_hours: -6,
        }
    }
}

impl PollWindow {
    /// Window that never closes.
    pub fn unrestricted() -> Self {
        Self {
            start_hour: 0,
            end_hour: 0,
            utc_offset_hours: 0,
        }
    }

    pub fn is_unrestricted(&self) -> bool {
        self.start_hour == self.end_hour
    }

    /// Whether a local hour (0-23) falls inside the window.
    pub fn contains_hour(&self, hour: u32) -> bool {
        let (start, end) = (self.start_hour, self.end_hour);
        if start == end {
            true
        } else if start < end {
            start <= hour && hour < end
        } else {
            hour >= start || hour < end
        }
    }

    pub fn local_hour(&self, now: DateTime<Utc>) -> u32 {
        // Offsets beyond ±23h are rejected at config load; fall back to UTC.
        let offset =
            FixedOffset::east_opt(self.utc_offset_hours * 3600).unwrap_or_else(|| Utc.fix());
        now.with_timezone(&offset).hour()
    }

    pub fn is_within_allowed_window(&self, now: DateTime<Utc>) -> bool {
        self.contains_hour(self.local_hour(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 10, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_window_wraps_midnight() {
        let window = PollWindow {
            start_hour: 18,
            end_hour: 6,
            utc_offset_hours: 0,
        };
        assert!(window.is_within_allowed_window(at(23)));
        assert!(window.is_within_allowed_window(at(2)));
        assert!(window.is_within_allowed_window(at(18)));
        assert!(!window.is_within_allowed_window(at(12)));
        assert!(!window.is_within_allowed_window(at(6)));
    }

    #[test]
    fn test_window_same_day() {
        let window = PollWindow {
            start_hour: 9,
            end_hour: 17,
            utc_offset_hours: 0,
        };
        assert!(window.contains_hour(9));
        assert!(window.contains_hour(16));
        assert!(!window.contains_hour(17));
        assert!(!window.contains_hour(3));
    }

    #[test]
    fn test_window_applies_offset() {
        // 00:00 UTC is 18:00 the previous day at UTC-6
        let window = PollWindow::default();
        assert!(window.is_within_allowed_window(at(0)));
        // 18:00 UTC is 12:00 at UTC-6
        assert!(!window.is_within_allowed_window(at(18)));
    }

    #[test]
    fn test_unrestricted_window() {
        let window = PollWindow::unrestricted();
        assert!((0..24).all(|h| window.contains_hour(h)));
    }

    #[test]
    fn test_low_priority_not_due_after_one_hour() {
        let intervals = PollIntervals::default();
        let mut case = MonitoredCase::new("1:24-cv-00001", "nysd", Priority::Low);
        case.last_checked = Some(at(1));

        assert!(!intervals.is_due(&case, at(2)));
        assert!(intervals.is_due(&case, at(1) + Duration::hours(24)));
    }

    #[test]
    fn test_high_priority_due_after_interval() {
        let intervals = PollIntervals::default();
        let mut case = MonitoredCase::new("1:24-cv-00002", "nysd", Priority::High);
        assert!(intervals.is_due(&case, at(1)));

        case.last_checked = Some(at(1));
        assert!(!intervals.is_due(&case, at(1) + Duration::minutes(59)));
        assert!(intervals.is_due(&case, at(2)));
    }

    #[test]
    fn test_jitter_stays_within_spread() {
        let intervals = PollIntervals {
            jitter: 0.1,
            ..PollIntervals::default()
        };
        let mut case = MonitoredCase::new("1:24-cv-00003", "nysd", Priority::Low);
        case.last_checked = Some(at(0));
        // 20h is below the 24h * 0.9 floor, 27h is above the 24h * 1.1 ceiling
        for _ in 0..50 {
            assert!(!intervals.is_due(&case, at(0) + Duration::hours(20)));
            assert!(intervals.is_due(&case, at(0) + Duration::hours(27)));
        }
    }
}
