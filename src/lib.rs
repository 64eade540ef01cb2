//! # docket_monitor
//!
//! Budget-aware monitor for federal court dockets.
//!
//! This library provides:
//! - A poll scheduler with per-priority intervals and an off-peak window
//! - A quarterly cost ledger that never authorizes spend past `budget - buffer`
//! - Free-first docket lookups with a billed fallback
//! - Slack, Discord, Teams and signed-webhook notifications
//! - An HTTP API for the dashboard
//!
//! ## Check Flow
//!
//! ```text
//!   due? ──no──▶ NotDue
//!    │
//!    ▼
//!   free source ──fresher──▶ store new entries ──▶ notify
//!    │ stale / unavailable
//!    ▼
//!   window open? ──no──▶ SkippedWindowClosed
//!    │
//!    ▼
//!   reserve estimate ──refused──▶ SkippedBudget
//!    │
//!    ▼
//!   paid source (retried) ──fail──▶ release, Failed
//!    │
//!    ▼
//!   commit billed pages ──▶ store new entries ──▶ notify
//! ```
//!
//! ## Modules
//! - `case`: Cases, docket entries and document classification
//! - `schedule`: Poll intervals and the allowed window
//! - `budget`: Pricing, cost ledger and retry policy
//! - `store`: Case/entry/ledger persistence (memory, SQLite)
//! - `sources`: Free and paid docket sources
//! - `notify`: Notification sinks and the delivery gate
//! - `monitor`: The check policy and run loop
//! - `api`: Dashboard HTTP endpoints

pub mod api;
pub mod budget;
pub mod case;
pub mod config;
pub mod monitor;
pub mod notify;
pub mod schedule;
pub mod sources;
pub mod store;
pub mod util;

pub use config::Config;
pub use monitor::{CaseMonitor, CheckOutcome, CycleReport};
