//! HTTP API for the docket monitor dashboard.
//!
//! ## Endpoints
//!
//! - `GET /api/health` - Health check
//! - `GET /api/cases` - List monitored cases
//! - `POST /api/cases` - Add a case (or update its priority)
//! - `DELETE /api/cases/{number}` - Stop monitoring a case
//! - `POST /api/cases/{number}/check` - Check a case now
//! - `PUT /api/cases/{number}/notifications` - Enable/disable notifications
//! - `GET /api/entries/recent` - Recently discovered docket entries
//! - `GET /api/stats/costs` - Quarter-to-date spend and remaining budget

mod cases;
mod routes;
mod stats;

pub use routes::{router, serve, shutdown_signal, AppState};
