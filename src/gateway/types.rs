//! Margin data types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Current margin state of one LP account.
///
/// `margin_utilization` is a ratio (0.0-1.0) regardless of how the upstream
/// API formats it; the gateway normalizes at the boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarginSnapshot {
    /// Liquidity provider name
    pub lp: String,
    /// Used/available margin ratio (0.0-1.0)
    pub margin_utilization: Decimal,
    /// Account equity in account currency
    pub equity: Option<Decimal>,
    /// Remaining free margin in account currency
    pub free_margin: Option<Decimal>,
    /// When the upstream last refreshed this reading
    pub updated_at: Option<DateTime<Utc>>,
}

impl MarginSnapshot {
    pub fn new(lp: &str, margin_utilization: Decimal) -> Self {
        Self {
            lp: lp.to_string(),
            margin_utilization,
            equity: None,
            free_margin: None,
            updated_at: None,
        }
    }
}
