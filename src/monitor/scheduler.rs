//! Reminder cadence with two-phase decay.
//!
//! Cards start in a burst phase with tight reminder spacing, then fall back to
//! a slower cooldown cadence so long-lived cards do not create alert storms.

use chrono::{DateTime, Duration, Utc};

use crate::card::{AlertCard, CardStatus};
use crate::config::NotificationConfig;

/// Decides whether a reminder is due for an awaiting card.
///
/// Deterministic: the decision depends only on the card's timestamps and the
/// `now` passed in, so it can be tested without a clock.
#[derive(Debug, Clone)]
pub struct NotificationPolicy {
    initial_window: Duration,
    initial_frequency: Duration,
    cooldown_frequency: Duration,
}

impl NotificationPolicy {
    pub fn new(config: &NotificationConfig) -> Self {
        Self {
            initial_window: Duration::seconds(config.initial_window_secs as i64),
            initial_frequency: Duration::seconds(config.initial_frequency_secs as i64),
            cooldown_frequency: Duration::seconds(config.cooldown_frequency_secs as i64),
        }
    }

    /// Minimum spacing between reminders for a card of the given age.
    pub fn spacing(&self, age: Duration) -> Duration {
        if age <= self.initial_window {
            self.initial_frequency
        } else {
            self.cooldown_frequency
        }
    }

    /// Whether a reminder should be emitted at `now`.
    ///
    /// Only cards awaiting a human decision are ever considered; ignored and
    /// terminal cards are exempt.
    pub fn is_due(&self, card: &AlertCard, now: DateTime<Utc>) -> bool {
        if card.status != CardStatus::AwaitingHitl {
            return false;
        }

        match card.last_notified_at {
            None => true,
            Some(last) => now - last >= self.spacing(now - card.created_at),
        }
    }
}
