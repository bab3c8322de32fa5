//! LP margin data source.
//!
//! ## EigenFlow
//! REST access to LP account data:
//! - Bearer-token authentication
//! - Per-LP account snapshots with margin utilization
//!
//! The `MarginDataProvider` trait abstracts the source so the monitoring loop
//! can run against the mock provider in tests.

mod client;
pub mod mock;
mod traits;
mod types;

pub use client::EigenFlowClient;
pub use mock::MockMarginProvider;
pub use traits::MarginDataProvider;
pub use types::MarginSnapshot;

use thiserror::Error;

/// Errors from the margin data source.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unknown LP: {0}")]
    UnknownLp(String),

    #[error("malformed gateway response: {0}")]
    Malformed(String),
}
