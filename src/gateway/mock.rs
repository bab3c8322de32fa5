//! Mock margin data provider for tests and offline runs.
//!
//! Readings are scripted per LP and individual LPs can be made to fail so the
//! loop's per-LP isolation can be exercised.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::traits::MarginDataProvider;
use super::types::MarginSnapshot;
use super::GatewayError;

#[derive(Default)]
struct MockState {
    readings: HashMap<String, Decimal>,
    failing: HashSet<String>,
}

/// In-memory provider with scriptable readings and failure injection.
#[derive(Clone, Default)]
pub struct MockMarginProvider {
    state: Arc<RwLock<MockState>>,
}

impl MockMarginProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set (or update) the current utilization ratio for an LP.
    pub async fn set_margin(&self, lp: &str, utilization: Decimal) {
        let mut state = self.state.write().await;
        state.readings.insert(lp.to_string(), utilization);
        state.failing.remove(lp);
    }

    /// Make reads for an LP fail until its margin is set again.
    pub async fn fail_lp(&self, lp: &str) {
        let mut state = self.state.write().await;
        state.readings.entry(lp.to_string()).or_default();
        state.failing.insert(lp.to_string());
    }
}

#[async_trait]
impl MarginDataProvider for MockMarginProvider {
    async fn lp_identifiers(&self) -> Result<Vec<String>, GatewayError> {
        let state = self.state.read().await;
        let mut lps: Vec<String> = state.readings.keys().cloned().collect();
        lps.sort();
        Ok(lps)
    }

    async fn margin_for(&self, lp: &str) -> Result<MarginSnapshot, GatewayError> {
        let state = self.state.read().await;
        if state.failing.contains(lp) {
            return Err(GatewayError::Malformed(format!(
                "injected failure for LP {}",
                lp
            )));
        }
        state
            .readings
            .get(lp)
            .map(|utilization| MarginSnapshot::new(lp, *utilization))
            .ok_or_else(|| GatewayError::UnknownLp(lp.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_scripted_readings_and_failures() {
        let provider = MockMarginProvider::new();
        provider.set_margin("LP-A", dec!(0.96)).await;
        provider.set_margin("LP-B", dec!(0.10)).await;
        provider.fail_lp("LP-B").await;

        assert_eq!(provider.lp_identifiers().await.unwrap(), vec!["LP-A", "LP-B"]);
        assert_eq!(
            provider.margin_for("LP-A").await.unwrap().margin_utilization,
            dec!(0.96)
        );
        assert!(provider.margin_for("LP-B").await.is_err());
        assert!(matches!(
            provider.margin_for("LP-C").await,
            Err(GatewayError::UnknownLp(_))
        ));

        // Setting a margin clears the injected failure
        provider.set_margin("LP-B", dec!(0.20)).await;
        assert!(provider.margin_for("LP-B").await.is_ok());
    }
}
