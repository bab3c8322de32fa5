//! Provider trait for margin data sources.

use async_trait::async_trait;

use super::types::MarginSnapshot;
use super::GatewayError;

/// Trait for sources of per-LP margin readings.
///
/// The monitoring loop queries each LP individually so a failure for one LP
/// never aborts evaluation of the others.
#[async_trait]
pub trait MarginDataProvider: Send + Sync {
    /// Names of all LPs this source knows about.
    async fn lp_identifiers(&self) -> Result<Vec<String>, GatewayError>;

    /// Current margin snapshot for a single LP.
    async fn margin_for(&self, lp: &str) -> Result<MarginSnapshot, GatewayError>;
}
