//! Configuration management for the docket monitor.
//!
//! Values come from three layers, later ones winning:
//! 1. built-in defaults
//! 2. an optional YAML file named by `MONITOR_CONFIG`
//! 3. environment variables
//!
//! Environment variables:
//! - `QUARTERLY_BUDGET` - Dollars per quarter. Defaults to `30.00`.
//! - `SAFETY_BUFFER` - Dollars withheld from the budget. Defaults to `5.00`.
//! - `PAGE_RATE` - Dollars per billed page. Defaults to `0.10`.
//! - `DOCUMENT_CAP` - Maximum dollars per document. Defaults to `3.00`.
//! - `DOCKET_CHECK_PAGES` / `DOCUMENT_DOWNLOAD_PAGES` - Page estimates.
//! - `POLL_HIGH_SECS`, `POLL_MEDIUM_SECS`, `POLL_LOW_SECS` - Intervals per priority.
//! - `POLL_JITTER` - Fractional interval spread, e.g. `0.1`.
//! - `POLL_WINDOW_ENABLED` - Set to `false` to poll at any hour.
//! - `POLL_WINDOW_START`, `POLL_WINDOW_END` - Allowed hours (local, 0-23).
//! - `POLL_WINDOW_UTC_OFFSET` - Local offset from UTC in hours. Defaults to `-6`.
//! - `MAX_RETRIES`, `RETRY_DELAY_SECS` - Paid-query retry policy.
//! - `MAX_CONCURRENT_CHECKS` - Defaults to `3`.
//! - `CYCLE_INTERVAL_SECS`, `ERROR_BACKOFF_SECS` - Run-loop timing.
//! - `NOTIFY_RATE_LIMIT` - Notifications per hour, `0` for unlimited. Defaults to `10`.
//! - `NOTIFY_DOCUMENT_TYPES` - Comma list of document types to notify on (empty = all).
//! - `SLACK_WEBHOOK_URL`, `DISCORD_WEBHOOK_URL`, `TEAMS_WEBHOOK_URL` - Chat notifiers.
//! - `WEBHOOK_URL`, `WEBHOOK_SECRET` - Generic signed webhook.
//! - `COURTLISTENER_TOKEN`, `COURTLISTENER_BASE_URL` - Free docket source.
//! - `PACER_BRIDGE_URL`, `PACER_BRIDGE_KEY` - Paid docket source.
//! - `DATABASE_PATH` - SQLite file. Defaults to `docket_monitor.db`.
//! - `HOST` - Dashboard host. Defaults to `127.0.0.1`.
//! - `PORT` - Dashboard port. Defaults to `8080`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::budget::{BudgetLimits, PricingConfig, RetryPolicy};
use crate::case::DocumentType;
use crate::schedule::{PollIntervals, PollWindow};
use crate::util::{parse_bool, parse_dollars, parse_list};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),

    #[error("Failed to read config file {0}: {1}")]
    Io(PathBuf, String),

    #[error("Failed to parse config file {0}: {1}")]
    Parse(PathBuf, String),
}

fn invalid(name: &str, reason: impl ToString) -> ConfigError {
    ConfigError::InvalidValue(name.to_string(), reason.to_string())
}

/// Run-loop tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    pub max_concurrent_checks: usize,
    pub cycle_interval_secs: u64,
    pub error_backoff_secs: u64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_concurrent_checks: 3,
            cycle_interval_secs: 300,
            error_backoff_secs: 60,
        }
    }
}

impl LoopConfig {
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Deliveries allowed per hour; 0 disables the limit
    pub rate_limit_per_hour: usize,

    /// Only these document types are delivered (empty = all)
    pub document_types: Vec<DocumentType>,

    pub slack_webhook_url: Option<String>,
    pub discord_webhook_url: Option<String>,
    pub teams_webhook_url: Option<String>,
    pub webhook_url: Option<String>,
    pub webhook_secret: Option<String>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            rate_limit_per_hour: 10,
            document_types: Vec::new(),
            slack_webhook_url: None,
            discord_webhook_url: None,
            teams_webhook_url: None,
            webhook_url: None,
            webhook_secret: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub courtlistener_token: Option<String>,
    pub courtlistener_base_url: Option<String>,
    pub paid_bridge_url: Option<String>,
    pub paid_bridge_key: Option<String>,
}

/// Monitor configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub budget: BudgetLimits,
    pub pricing: PricingConfig,
    pub intervals: PollIntervals,
    pub window: PollWindow,
    pub retry: RetryPolicy,
    #[serde(rename = "loop")]
    pub run_loop: LoopConfig,
    pub notifications: NotificationConfig,
    pub sources: SourceConfig,

    /// SQLite database file
    pub database_path: PathBuf,

    /// Dashboard host
    pub host: String,

    /// Dashboard port
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            budget: BudgetLimits::default(),
            pricing: PricingConfig::default(),
            intervals: PollIntervals::default(),
            window: PollWindow::default(),
            retry: RetryPolicy::default(),
            run_loop: LoopConfig::default(),
            notifications: NotificationConfig::default(),
            sources: SourceConfig::default(),
            database_path: PathBuf::from("docket_monitor.db"),
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl Config {
    /// Load configuration from `MONITOR_CONFIG` (if set) and environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file cannot be read or parsed, or if any
    /// value fails to parse or validate.
    pub fn from_env() -> Result<Self, ConfigError> {
        let base = match std::env::var("MONITOR_CONFIG") {
            Ok(path) if !path.trim().is_empty() => Self::from_file(Path::new(path.trim()))?,
            _ => Self::default(),
        };
        base.with_overrides(|name| std::env::var(name).ok())
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e.to_string()))?;
        Self::from_yaml(&text).map_err(|e| match e {
            ConfigError::Parse(_, msg) => ConfigError::Parse(path.to_path_buf(), msg),
            other => other,
        })
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(text).map_err(|e| ConfigError::Parse(PathBuf::new(), e.to_string()))
    }

    /// Apply variables from `lookup` over `self`, then validate.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);

        if let Some(cents) = env.dollars("QUARTERLY_BUDGET")? {
            self.budget.quarterly_budget_cents = cents;
        }
        if let Some(cents) = env.dollars("SAFETY_BUFFER")? {
            self.budget.safety_buffer_cents = cents;
        }
        if let Some(cents) = env.dollars("PAGE_RATE")? {
            self.pricing.per_page_cents = cents;
        }
        if let Some(cents) = env.dollars("DOCUMENT_CAP")? {
            self.pricing.max_document_cents = cents;
        }
        env.set("DOCKET_CHECK_PAGES", &mut self.pricing.page_estimates.docket_check)?;
        env.set("DOCUMENT_DOWNLOAD_PAGES", &mut self.pricing.page_estimates.document_download)?;

        env.set("POLL_HIGH_SECS", &mut self.intervals.high_secs)?;
        env.set("POLL_MEDIUM_SECS", &mut self.intervals.medium_secs)?;
        env.set("POLL_LOW_SECS", &mut self.intervals.low_secs)?;
        env.set("POLL_JITTER", &mut self.intervals.jitter)?;

        env.set("POLL_WINDOW_START", &mut self.window.start_hour)?;
        env.set("POLL_WINDOW_END", &mut self.window.end_hour)?;
        env.set("POLL_WINDOW_UTC_OFFSET", &mut self.window.utc_offset_hours)?;
        if env.string("POLL_WINDOW_ENABLED").is_some_and(|v| !parse_bool(&v)) {
            self.window = PollWindow::unrestricted();
        }

        env.set("MAX_RETRIES", &mut self.retry.max_retries)?;
        if let Some(secs) = env.parse::<u64>("RETRY_DELAY_SECS")? {
            self.retry.delay = Duration::from_secs(secs);
        }

        env.set("MAX_CONCURRENT_CHECKS", &mut self.run_loop.max_concurrent_checks)?;
        env.set("CYCLE_INTERVAL_SECS", &mut self.run_loop.cycle_interval_secs)?;
        env.set("ERROR_BACKOFF_SECS", &mut self.run_loop.error_backoff_secs)?;

        let notify = &mut self.notifications;
        env.set("NOTIFY_RATE_LIMIT", &mut notify.rate_limit_per_hour)?;
        if let Some(list) = env.string("NOTIFY_DOCUMENT_TYPES") {
            notify.document_types = parse_list(&list)
                .iter()
                .map(|s| s.parse::<DocumentType>())
                .collect::<Result<_, _>>()
                .map_err(|e| invalid("NOTIFY_DOCUMENT_TYPES", e))?;
        }
        env.set_opt("SLACK_WEBHOOK_URL", &mut notify.slack_webhook_url);
        env.set_opt("DISCORD_WEBHOOK_URL", &mut notify.discord_webhook_url);
        env.set_opt("TEAMS_WEBHOOK_URL", &mut notify.teams_webhook_url);
        env.set_opt("WEBHOOK_URL", &mut notify.webhook_url);
        env.set_opt("WEBHOOK_SECRET", &mut notify.webhook_secret);

        let sources = &mut self.sources;
        env.set_opt("COURTLISTENER_TOKEN", &mut sources.courtlistener_token);
        env.set_opt("COURTLISTENER_BASE_URL", &mut sources.courtlistener_base_url);
        env.set_opt("PACER_BRIDGE_URL", &mut sources.paid_bridge_url);
        env.set_opt("PACER_BRIDGE_KEY", &mut sources.paid_bridge_key);

        if let Some(path) = env.string("DATABASE_PATH") {
            self.database_path = PathBuf::from(path);
        }
        if let Some(host) = env.string("HOST") {
            self.host = host;
        }
        env.set("PORT", &mut self.port)?;

        self.validate()?;
        Ok(self)
    }

    /// Reject values that would make the scheduler misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.budget.safety_buffer_cents > self.budget.quarterly_budget_cents {
            return Err(invalid(
                "SAFETY_BUFFER",
                "safety buffer is larger than the quarterly budget",
            ));
        }
        if self.pricing.per_page_cents == 0 {
            return Err(invalid("PAGE_RATE", "must be greater than zero"));
        }
        for (name, secs) in [
            ("POLL_HIGH_SECS", self.intervals.high_secs),
            ("POLL_MEDIUM_SECS", self.intervals.medium_secs),
            ("POLL_LOW_SECS", self.intervals.low_secs),
        ] {
            if secs == 0 {
                return Err(invalid(name, "must be greater than zero"));
            }
        }
        if !(0.0..1.0).contains(&self.intervals.jitter) {
            return Err(invalid("POLL_JITTER", "must be in [0, 1)"));
        }
        if self.window.start_hour > 23 {
            return Err(invalid("POLL_WINDOW_START", "hour must be 0-23"));
        }
        if self.window.end_hour > 23 {
            return Err(invalid("POLL_WINDOW_END", "hour must be 0-23"));
        }
        if self.window.utc_offset_hours.abs() > 23 {
            return Err(invalid("POLL_WINDOW_UTC_OFFSET", "offset must be within ±23 hours"));
        }
        if self.run_loop.max_concurrent_checks == 0 {
            return Err(invalid("MAX_CONCURRENT_CHECKS", "must be at least 1"));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Typed view over a variable lookup.
struct Env<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    /// Non-blank value, trimmed.
    fn string(&self, name: &str) -> Option<String> {
        (self.0)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, name: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.string(name)
            .map(|v| v.parse::<T>().map_err(|e| invalid(name, e)))
            .transpose()
    }

    fn set<T>(&self, name: &str, target: &mut T) -> Result<(), ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        if let Some(value) = self.parse(name)? {
            *target = value;
        }
        Ok(())
    }

    fn set_opt(&self, name: &str, target: &mut Option<String>) {
        if let Some(value) = self.string(name) {
            *target = Some(value);
        }
    }

    fn dollars(&self, name: &str) -> Result<Option<u64>, ConfigError> {
        self.string(name)
            .map(|v| parse_dollars(&v).ok_or_else(|| invalid(name, format!("'{}' is not a dollar amount", v))))
            .transpose()
    }
}
