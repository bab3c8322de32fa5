//! Concurrency-safe in-memory store for alert cards.
//!
//! The store is the only shared mutable resource in the system. The monitoring
//! loop and human-triggered operations both mutate it; a single `RwLock`
//! serializes writers while read-only queries observe consistent snapshots.
//! Long-running external calls must never happen while the lock is held.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::error;

use super::types::{
    Actor, AlertCard, CardError, CardStatus, HistoryEntry, ReportEntry, ReportKind,
};

struct Inner {
    cards: HashMap<String, AlertCard>,
    next_seq: u64,
}

/// Authoritative collection of alert cards.
///
/// Cheap to clone; clones share the same underlying state.
#[derive(Clone)]
pub struct CardStore {
    inner: Arc<RwLock<Inner>>,
}

impl CardStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                cards: HashMap::new(),
                next_seq: 1,
            })),
        }
    }

    // ==================== Queries ====================

    /// Get a snapshot of a single card.
    pub async fn get(&self, id: &str) -> Option<AlertCard> {
        self.inner.read().await.cards.get(id).cloned()
    }

    /// List cards, optionally filtered by status and/or LP, ordered by creation.
    pub async fn list(&self, status: Option<CardStatus>, lp: Option<&str>) -> Vec<AlertCard> {
        let inner = self.inner.read().await;
        let mut cards: Vec<AlertCard> = inner
            .cards
            .values()
            .filter(|c| status.map_or(true, |s| c.status == s))
            .filter(|c| lp.map_or(true, |l| c.lp == l))
            .cloned()
            .collect();
        cards.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        cards
    }

    /// The active card for an LP, if any.
    ///
    /// Finding more than one active card is a defect; it is surfaced loudly
    /// instead of silently picking one.
    pub async fn active_for(&self, lp: &str) -> Result<Option<AlertCard>, CardError> {
        let inner = self.inner.read().await;
        let mut active = inner
            .cards
            .values()
            .filter(|c| c.lp == lp && c.status.is_active());

        let first = active.next().cloned();
        if let Some(second) = active.next() {
            error!(
                lp = %lp,
                first = %first.as_ref().map(|c| c.id.clone()).unwrap_or_default(),
                second = %second.id,
                "Invariant violation: multiple active cards for one LP"
            );
            return Err(CardError::InvariantViolation(format!(
                "multiple active cards for LP {}",
                lp
            )));
        }
        Ok(first)
    }

    /// All cards currently awaiting a human decision.
    pub async fn awaiting(&self) -> Vec<AlertCard> {
        self.list(Some(CardStatus::AwaitingHitl), None).await
    }

    /// Card counts keyed by status.
    pub async fn counts_by_status(&self) -> HashMap<CardStatus, usize> {
        let inner = self.inner.read().await;
        let mut counts = HashMap::new();
        for card in inner.cards.values() {
            *counts.entry(card.status).or_insert(0) += 1;
        }
        counts
    }

    // ==================== Mutations ====================

    /// Create a card for a fresh threshold breach.
    ///
    /// Thresholds are captured on the card so later configuration changes do
    /// not retroactively alter an in-flight episode.
    pub async fn create_card(
        &self,
        lp: &str,
        margin_level: Decimal,
        threshold: Decimal,
        hysteresis_threshold: Decimal,
        now: DateTime<Utc>,
    ) -> Result<AlertCard, CardError> {
        let mut inner = self.inner.write().await;

        if inner
            .cards
            .values()
            .any(|c| c.lp == lp && c.status.is_active())
        {
            return Err(CardError::InvariantViolation(format!(
                "active card already exists for LP {}",
                lp
            )));
        }

        let id = format!("card-{}-{}", now.timestamp(), inner.next_seq);
        inner.next_seq += 1;

        let mut card = AlertCard::new(id.clone(), lp, margin_level, threshold, hysteresis_threshold, now);
        card.history.push(
            HistoryEntry::new(
                Actor::System,
                "triggered",
                format!(
                    "margin level {} reached trigger threshold {}",
                    margin_level, threshold
                ),
                now,
            )
            .with_metadata("margin_level", serde_json::json!(margin_level.to_string())),
        );

        inner.cards.insert(id, card.clone());
        Ok(card)
    }

    /// Record the latest observed margin reading. No history entry; this is a
    /// routine observation, not a transition.
    ///
    /// `expected` is the status the caller observed when it read the card.
    /// A card that changed concurrently (e.g. a human ignored it between
    /// snapshot and commit) is rejected so exempt cards stay untouched.
    pub async fn update_margin(
        &self,
        id: &str,
        margin_level: Decimal,
        expected: CardStatus,
    ) -> Result<(), CardError> {
        let mut inner = self.inner.write().await;
        let card = inner
            .cards
            .get_mut(id)
            .ok_or_else(|| CardError::UnknownCard(id.to_string()))?;
        if card.status != expected {
            return Err(CardError::InvalidTransition {
                id: id.to_string(),
                from: card.status,
                to: expected,
            });
        }
        card.margin_level = margin_level;
        Ok(())
    }

    /// Append a report from the analysis service and adopt its thread id.
    pub async fn attach_report(
        &self,
        id: &str,
        kind: ReportKind,
        thread_id: Option<&str>,
        raw_response: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<AlertCard, CardError> {
        let mut inner = self.inner.write().await;
        let card = inner
            .cards
            .get_mut(id)
            .ok_or_else(|| CardError::UnknownCard(id.to_string()))?;

        if card.thread_id.is_none() {
            card.thread_id = thread_id.map(str::to_string);
        }
        card.reports.push(ReportEntry {
            kind,
            raw_response,
            received_at: now,
        });

        let action = match kind {
            ReportKind::Initial => "initial-report-received",
            ReportKind::Recheck => "recheck-report-received",
        };
        card.history.push(HistoryEntry::new(
            Actor::System,
            action,
            format!("analysis report stored ({} total)", card.reports.len()),
            now,
        ));

        Ok(card.clone())
    }

    /// Record a system-originated error (e.g. a failed analysis call) in the
    /// audit ledger without changing status.
    pub async fn record_system_note(
        &self,
        id: &str,
        action: &str,
        message: String,
        now: DateTime<Utc>,
    ) -> Result<(), CardError> {
        let mut inner = self.inner.write().await;
        let card = inner
            .cards
            .get_mut(id)
            .ok_or_else(|| CardError::UnknownCard(id.to_string()))?;
        card.history
            .push(HistoryEntry::new(Actor::System, action, message, now));
        Ok(())
    }

    /// Close an episode whose margin fell to/below the captured resolve level.
    ///
    /// An ignored card inside its window is exempt even when the caller's
    /// snapshot predates the ignore; the check runs under the write lock.
    pub async fn auto_resolve(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<AlertCard, CardError> {
        let mut inner = self.inner.write().await;
        let card = inner
            .cards
            .get_mut(id)
            .ok_or_else(|| CardError::UnknownCard(id.to_string()))?;

        if card.status == CardStatus::Ignored && !card.ignore_expired(now) {
            return Err(CardError::InvalidTransition {
                id: id.to_string(),
                from: card.status,
                to: CardStatus::Completed,
            });
        }

        let message = format!(
            "margin level {} fell to/below resolve threshold {}",
            card.margin_level, card.hysteresis_threshold
        );
        Self::transition(
            card,
            CardStatus::Completed,
            HistoryEntry::new(Actor::System, "auto-resolved", message, now),
        )?;
        card.ignore_until = None;
        Ok(card.clone())
    }

    /// Return an ignored card whose window elapsed to the awaiting state and
    /// reset its notification cadence so a reminder fires immediately.
    pub async fn resume_from_ignore(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<AlertCard, CardError> {
        let mut inner = self.inner.write().await;
        let card = inner
            .cards
            .get_mut(id)
            .ok_or_else(|| CardError::UnknownCard(id.to_string()))?;

        let message = format!("ignore window elapsed with margin level {}", card.margin_level);
        Self::transition(
            card,
            CardStatus::AwaitingHitl,
            HistoryEntry::new(Actor::System, "ignore-expired, resumed", message, now),
        )?;
        card.ignore_until = None;
        card.last_notified_at = None;
        Ok(card.clone())
    }

    /// Snooze a card until the given instant.
    pub async fn set_ignore(
        &self,
        id: &str,
        until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<AlertCard, CardError> {
        if until <= now {
            return Err(CardError::InvalidIgnoreWindow(format!(
                "ignore window must end in the future (requested {})",
                until
            )));
        }

        let mut inner = self.inner.write().await;
        let card = inner
            .cards
            .get_mut(id)
            .ok_or_else(|| CardError::UnknownCard(id.to_string()))?;

        Self::transition(
            card,
            CardStatus::Ignored,
            HistoryEntry::new(
                Actor::Human,
                "ignored",
                format!("card ignored until {}", until),
                now,
            )
            .with_metadata("ignore_until", serde_json::json!(until.to_rfc3339())),
        )?;
        card.ignore_until = Some(until);
        Ok(card.clone())
    }

    /// Force a card to a human-chosen status with a free-form reason.
    pub async fn override_status(
        &self,
        id: &str,
        target: CardStatus,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<AlertCard, CardError> {
        let mut inner = self.inner.write().await;

        // An override may not produce a second active card for the same LP.
        if target.is_active() {
            let lp = inner
                .cards
                .get(id)
                .ok_or_else(|| CardError::UnknownCard(id.to_string()))?
                .lp
                .clone();
            if inner
                .cards
                .values()
                .any(|c| c.id != id && c.lp == lp && c.status.is_active())
            {
                return Err(CardError::InvariantViolation(format!(
                    "override to {} would create a second active card for LP {}",
                    target, lp
                )));
            }
        }

        let card = inner
            .cards
            .get_mut(id)
            .ok_or_else(|| CardError::UnknownCard(id.to_string()))?;

        let from = card.status;
        card.status = target;
        if !target.is_active() {
            card.ignore_until = None;
        }
        card.history.push(
            HistoryEntry::new(
                Actor::Human,
                "override",
                format!("status overridden {} -> {}: {}", from, target, reason),
                now,
            )
            .with_metadata("from", serde_json::json!(from.to_string()))
            .with_metadata("to", serde_json::json!(target.to_string()))
            .with_metadata("reason", serde_json::json!(reason)),
        );
        Ok(card.clone())
    }

    /// Record a human feedback decision on an awaiting card.
    ///
    /// The recheck report that feedback triggers is committed separately via
    /// [`attach_report`](Self::attach_report) once the external call returns.
    pub async fn record_feedback(
        &self,
        id: &str,
        decision: &str,
        notes: &str,
        now: DateTime<Utc>,
    ) -> Result<AlertCard, CardError> {
        let mut inner = self.inner.write().await;
        let card = inner
            .cards
            .get_mut(id)
            .ok_or_else(|| CardError::UnknownCard(id.to_string()))?;

        if card.status != CardStatus::AwaitingHitl {
            return Err(CardError::InvalidTransition {
                id: id.to_string(),
                from: card.status,
                to: CardStatus::AwaitingHitl,
            });
        }

        card.history.push(
            HistoryEntry::new(
                Actor::Human,
                "feedback",
                format!("human decision: {}", decision),
                now,
            )
            .with_metadata("decision", serde_json::json!(decision))
            .with_metadata("notes", serde_json::json!(notes)),
        );
        Ok(card.clone())
    }

    /// Record an emitted reminder. Only awaiting cards take reminders; a card
    /// a human ignored or overrode since the caller's snapshot is rejected.
    pub async fn mark_notified(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<AlertCard, CardError> {
        let mut inner = self.inner.write().await;
        let card = inner
            .cards
            .get_mut(id)
            .ok_or_else(|| CardError::UnknownCard(id.to_string()))?;

        if card.status != CardStatus::AwaitingHitl {
            return Err(CardError::InvalidTransition {
                id: id.to_string(),
                from: card.status,
                to: CardStatus::AwaitingHitl,
            });
        }

        card.last_notified_at = Some(now);
        card.notifications_sent += 1;
        card.history.push(HistoryEntry::new(
            Actor::System,
            "notification",
            format!("reminder #{} emitted", card.notifications_sent),
            now,
        ));
        Ok(card.clone())
    }

    /// Apply a status change with exactly one accompanying history entry.
    /// All regular transitions funnel through here.
    fn transition(
        card: &mut AlertCard,
        target: CardStatus,
        entry: HistoryEntry,
    ) -> Result<(), CardError> {
        if !card.status.can_transition_to(target) {
            return Err(CardError::InvalidTransition {
                id: card.id.clone(),
                from: card.status,
                to: target,
            });
        }
        card.status = target;
        card.history.push(entry);
        Ok(())
    }
}

impl Default for CardStore {
    fn default() -> Self {
        Self::new()
    }
}
