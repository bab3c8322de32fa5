//! External analysis service client.
//!
//! Requests human-readable risk reports for alert cards:
//! - Initial report when a card is created
//! - Recheck after human feedback, correlated by thread id
//!
//! Calls are bounded by a hard timeout and all failures come back as values;
//! nothing here is fatal to the monitoring loop.

mod client;

pub use client::{AnalysisClient, AnalysisError, Report, ReportStatus};
