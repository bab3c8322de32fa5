//! Alert card data model and state machine.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Lifecycle status of an alert card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardStatus {
    /// Waiting for a human decision (initial state)
    AwaitingHitl,
    /// Human snoozed the card; exempt from triggers and notifications until expiry
    Ignored,
    /// Episode closed (auto-resolved or confirmed done)
    Completed,
    /// Human forced the card out of its normal lifecycle
    Overridden,
}

impl CardStatus {
    /// Active cards block creation of a second card for the same LP.
    pub fn is_active(&self) -> bool {
        matches!(self, CardStatus::AwaitingHitl | CardStatus::Ignored)
    }

    /// Whether a regular (non-override) transition to `target` is allowed.
    ///
    /// Human overrides bypass this table; they may move a card anywhere as
    /// long as store-level invariants hold.
    pub fn can_transition_to(&self, target: CardStatus) -> bool {
        matches!(
            (self, target),
            (CardStatus::AwaitingHitl, CardStatus::Completed)
                | (CardStatus::AwaitingHitl, CardStatus::Ignored)
                | (CardStatus::Ignored, CardStatus::AwaitingHitl)
                | (CardStatus::Ignored, CardStatus::Completed)
                | (CardStatus::Ignored, CardStatus::Ignored)
        )
    }
}

impl fmt::Display for CardStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CardStatus::AwaitingHitl => "awaiting_hitl",
            CardStatus::Ignored => "ignored",
            CardStatus::Completed => "completed",
            CardStatus::Overridden => "overridden",
        };
        write!(f, "{}", s)
    }
}

/// Who performed an action recorded in the history ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    System,
    Human,
}

/// Kind of report received from the analysis service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    Initial,
    Recheck,
}

/// One immutable entry in a card's report log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportEntry {
    pub kind: ReportKind,
    pub raw_response: serde_json::Value,
    pub received_at: DateTime<Utc>,
}

/// One immutable entry in a card's audit ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub actor: Actor,
    pub action: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn new(actor: Actor, action: &str, message: String, timestamp: DateTime<Utc>) -> Self {
        Self {
            actor,
            action: action.to_string(),
            message,
            metadata: HashMap::new(),
            timestamp,
        }
    }

    /// Attach a metadata value to the entry.
    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

/// A long-lived stateful record of one LP margin risk episode.
///
/// Owned exclusively by the [`CardStore`](super::CardStore); callers only ever
/// see clones, so the history and report logs cannot be tampered with outside
/// the store's transition API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertCard {
    /// Unique identifier, assigned at creation
    pub id: String,
    /// Liquidity provider this card watches
    pub lp: String,
    pub status: CardStatus,
    /// Last observed utilization ratio (0.0-1.0)
    pub margin_level: Decimal,
    /// Trigger level captured at creation; later config changes do not apply
    pub threshold: Decimal,
    /// Resolve level captured at creation
    pub hysteresis_threshold: Decimal,
    /// Correlation key with the external analysis conversation
    pub thread_id: Option<String>,
    /// Append-only report log
    pub reports: Vec<ReportEntry>,
    /// Append-only audit ledger
    pub history: Vec<HistoryEntry>,
    /// While set and in the future, the card is exempt from triggers and reminders
    pub ignore_until: Option<DateTime<Utc>>,
    pub last_notified_at: Option<DateTime<Utc>>,
    pub notifications_sent: u32,
    pub created_at: DateTime<Utc>,
}

impl AlertCard {
    pub(crate) fn new(
        id: String,
        lp: &str,
        margin_level: Decimal,
        threshold: Decimal,
        hysteresis_threshold: Decimal,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            lp: lp.to_string(),
            status: CardStatus::AwaitingHitl,
            margin_level,
            threshold,
            hysteresis_threshold,
            thread_id: None,
            reports: Vec::new(),
            history: Vec::new(),
            ignore_until: None,
            last_notified_at: None,
            notifications_sent: 0,
            created_at: now,
        }
    }

    /// Whether the ignore window has elapsed at `now`.
    ///
    /// A card ignored without an explicit window stays ignored until a human
    /// acts on it.
    pub fn ignore_expired(&self, now: DateTime<Utc>) -> bool {
        match self.ignore_until {
            Some(until) => now > until,
            None => false,
        }
    }
}

/// Errors surfaced by card operations.
#[derive(Debug, Error)]
pub enum CardError {
    #[error("unknown card id: {0}")]
    UnknownCard(String),

    #[error("card {0} has no analysis thread; feedback requires a successful initial report")]
    MissingThreadId(String),

    #[error("invalid transition for card {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: CardStatus,
        to: CardStatus,
    },

    #[error("invalid ignore window: {0}")]
    InvalidIgnoreWindow(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn card() -> AlertCard {
        AlertCard::new(
            "card-1".to_string(),
            "[CFH] MAJESTIC FIN TRADE",
            dec!(0.96),
            dec!(0.90),
            dec!(0.85),
            Utc::now(),
        )
    }

    #[test]
    fn test_new_card_is_awaiting_hitl() {
        let card = card();
        assert_eq!(card.status, CardStatus::AwaitingHitl);
        assert!(card.thread_id.is_none());
        assert!(card.reports.is_empty());
        assert_eq!(card.notifications_sent, 0);
    }

    #[test]
    fn test_active_statuses() {
        assert!(CardStatus::AwaitingHitl.is_active());
        assert!(CardStatus::Ignored.is_active());
        assert!(!CardStatus::Completed.is_active());
        assert!(!CardStatus::Overridden.is_active());
    }

    #[test]
    fn test_transition_table() {
        use CardStatus::*;

        assert!(AwaitingHitl.can_transition_to(Completed));
        assert!(AwaitingHitl.can_transition_to(Ignored));
        assert!(Ignored.can_transition_to(AwaitingHitl));
        assert!(Ignored.can_transition_to(Completed));
        // Extending an existing ignore window is allowed
        assert!(Ignored.can_transition_to(Ignored));

        // Terminal states only move via explicit override
        assert!(!Completed.can_transition_to(AwaitingHitl));
        assert!(!Overridden.can_transition_to(AwaitingHitl));
        assert!(!AwaitingHitl.can_transition_to(Overridden));
    }

    #[test]
    fn test_ignore_expiry() {
        let mut card = card();
        let now = Utc::now();

        assert!(!card.ignore_expired(now));

        card.ignore_until = Some(now - chrono::Duration::seconds(1));
        assert!(card.ignore_expired(now));

        card.ignore_until = Some(now + chrono::Duration::minutes(60));
        assert!(!card.ignore_expired(now));
    }

    #[test]
    fn test_status_serde_round_trip() {
        let json = serde_json::to_string(&CardStatus::AwaitingHitl).unwrap();
        assert_eq!(json, "\"awaiting_hitl\"");
        let back: CardStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, CardStatus::AwaitingHitl);
    }
}
