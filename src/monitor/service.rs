//! Recurring margin monitoring service.
//!
//! Owns the background loop that polls margin readings and drives the alert
//! card lifecycle. Human operations (feedback, ignore, override) enter here
//! concurrently with the loop; the card store serializes all mutation.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::analysis::AnalysisClient;
use crate::card::{AlertCard, CardError, CardStatus, CardStore, ReportKind};
use crate::config::Config;
use crate::gateway::MarginDataProvider;

use super::scheduler::NotificationPolicy;

/// Result of a start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

/// How long to snooze a card.
#[derive(Debug, Clone, Copy)]
pub enum IgnoreWindow {
    /// Relative window in seconds from now
    Duration(u64),
    /// Explicit end instant
    Until(DateTime<Utc>),
}

/// Point-in-time view of the monitoring service.
#[derive(Debug, Clone, Serialize)]
pub struct MonitoringStatus {
    pub running: bool,
    pub poll_interval_secs: u64,
    pub trigger_threshold: Decimal,
    pub resolve_threshold: Decimal,
    /// Last time each LP breached its trigger level
    pub last_trigger: HashMap<String, DateTime<Utc>>,
    /// Card counts keyed by status name
    pub card_counts: HashMap<String, usize>,
}

/// Drives card creation, escalation, resolution and reminders.
pub struct MonitorService {
    poll_interval_secs: u64,
    trigger_threshold: Decimal,
    resolve_threshold: Decimal,
    policy: NotificationPolicy,
    store: CardStore,
    provider: Arc<dyn MarginDataProvider>,
    analysis: Arc<AnalysisClient>,
    running: Arc<AtomicBool>,
    last_trigger: Arc<RwLock<HashMap<String, DateTime<Utc>>>>,
}

impl MonitorService {
    pub fn new(
        config: &Config,
        store: CardStore,
        provider: Arc<dyn MarginDataProvider>,
        analysis: Arc<AnalysisClient>,
    ) -> Self {
        Self {
            poll_interval_secs: config.monitor.poll_interval_secs,
            trigger_threshold: config.monitor.trigger_threshold,
            resolve_threshold: config.monitor.resolve_threshold,
            policy: NotificationPolicy::new(&config.notification),
            store,
            provider,
            analysis,
            running: Arc::new(AtomicBool::new(false)),
            last_trigger: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    // ==================== Loop control ====================

    /// Start the background loop. Idempotent: starting a running service is a
    /// no-op reported as informational status.
    pub fn start(self: &Arc<Self>) -> StartOutcome {
        if self.running.swap(true, Ordering::SeqCst) {
            info!("📡 [MONITOR] already running");
            return StartOutcome::AlreadyRunning;
        }

        let service = Arc::clone(self);
        tokio::spawn(async move {
            info!(
                interval_secs = service.poll_interval_secs,
                trigger = %service.trigger_threshold,
                resolve = %service.resolve_threshold,
                "🚀 [MONITOR] loop started"
            );

            let mut interval = tokio::time::interval(std::time::Duration::from_secs(
                service.poll_interval_secs,
            ));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                if !service.running.load(Ordering::SeqCst) {
                    break;
                }
                service.run_cycle().await;
            }

            info!("🛑 [MONITOR] loop stopped");
        });

        StartOutcome::Started
    }

    /// Stop the loop. Idempotent; preserves all card state and never
    /// interrupts an in-flight cycle, it only prevents rescheduling.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            info!("📡 [MONITOR] already stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Current service status for operators.
    pub async fn status(&self) -> MonitoringStatus {
        MonitoringStatus {
            running: self.is_running(),
            poll_interval_secs: self.poll_interval_secs,
            trigger_threshold: self.trigger_threshold,
            resolve_threshold: self.resolve_threshold,
            last_trigger: self.last_trigger.read().await.clone(),
            card_counts: self
                .store
                .counts_by_status()
                .await
                .into_iter()
                .map(|(status, count)| (status.to_string(), count))
                .collect(),
        }
    }

    // ==================== Monitoring cycle ====================

    /// One full evaluation pass over all LPs. Public so tests (and one-shot
    /// tooling) can drive cycles without the timer.
    pub async fn run_cycle(&self) {
        let cycle_start = Utc::now();

        let lps = match self.provider.lp_identifiers().await {
            Ok(lps) => lps,
            Err(e) => {
                error!(error = %e, "📡 [CYCLE] failed to list LPs, skipping cycle");
                return;
            }
        };

        let mut healthy: Vec<String> = Vec::new();
        let mut any_alerting = false;
        let mut any_failed = false;

        for lp in &lps {
            // A failure for one LP must never abort evaluation of the others
            let snapshot = match self.provider.margin_for(lp).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!(lp = %lp, error = %e, "📡 [CYCLE] margin fetch failed, skipping LP");
                    any_failed = true;
                    continue;
                }
            };

            match self
                .evaluate_lp(lp, snapshot.margin_utilization, Utc::now())
                .await
            {
                Ok(true) => healthy.push(format!(
                    "{} ({:.2}%)",
                    lp,
                    snapshot.margin_utilization * dec!(100)
                )),
                Ok(false) => any_alerting = true,
                Err(e) => error!(lp = %lp, error = %e, "📡 [CYCLE] evaluation failed"),
            }
        }

        // An unverified LP means the fleet cannot be declared healthy

        if let Some(summary) = Self::healthy_summary(&healthy, any_alerting, any_failed) {
            info!("✅ [CYCLE] all LPs healthy: {}", summary);
        }

        self.notification_pass(Utc::now()).await;

        debug!(
            elapsed_ms = (Utc::now() - cycle_start).num_milliseconds(),
            lp_count = lps.len(),
            "📡 [CYCLE] complete"
        );
    }

    /// Summary line for a cycle where every LP was verified healthy.
    fn healthy_summary(healthy: &[String], any_alerting: bool, any_failed: bool) -> Option<String> {
        if any_alerting || any_failed || healthy.is_empty() {
            None
        } else {
            Some(healthy.join(", "))
        }
    }

    /// Evaluate one LP reading against its card state.
    ///
    /// Returns `true` when the LP is healthy (no active episode remains).
    async fn evaluate_lp(
        &self,
        lp: &str,
        utilization: Decimal,
        now: DateTime<Utc>,
    ) -> Result<bool, CardError> {
        match self.store.active_for(lp).await? {
            None => {
                if utilization < self.trigger_threshold {
                    return Ok(true);
                }

                let card = self
                    .store
                    .create_card(
                        lp,
                        utilization,
                        self.trigger_threshold,
                        self.resolve_threshold,
                        now,
                    )
                    .await?;
                self.last_trigger.write().await.insert(lp.to_string(), now);
                warn!(
                    lp = %lp,
                    card_id = %card.id,
                    margin = %utilization,
                    threshold = %self.trigger_threshold,
                    "🚨 [TRIGGER] margin level breached trigger threshold"
                );
                self.request_initial_report(&card.id, lp, utilization, card.threshold)
                    .await;
                Ok(false)
            }

            Some(card) if card.status == CardStatus::AwaitingHitl => {
                self.store
                    .update_margin(&card.id, utilization, CardStatus::AwaitingHitl)
                    .await?;

                if utilization <= card.hysteresis_threshold {
                    self.store.auto_resolve(&card.id, now).await?;
                    info!(
                        lp = %lp,
                        card_id = %card.id,
                        margin = %utilization,
                        resolve = %card.hysteresis_threshold,
                        "✅ [RESOLVE] card auto-resolved"
                    );
                    return Ok(true);
                }

                if utilization >= card.threshold {
                    self.last_trigger.write().await.insert(lp.to_string(), now);
                }

                // A card whose initial report never succeeded retries here
                if card.thread_id.is_none() {
                    self.request_initial_report(&card.id, lp, utilization, card.threshold)
                        .await;
                }
                Ok(false)
            }

            Some(card) => {
                // Ignored cards are fully exempt until their window elapses
                if !card.ignore_expired(now) {
                    return Ok(false);
                }

                self.store
                    .update_margin(&card.id, utilization, CardStatus::Ignored)
                    .await?;

                if utilization <= card.hysteresis_threshold {
                    self.store.auto_resolve(&card.id, now).await?;
                    info!(
                        lp = %lp,
                        card_id = %card.id,
                        "✅ [RESOLVE] ignored card resolved after window expiry"
                    );
                    Ok(true)
                } else {
                    self.store.resume_from_ignore(&card.id, now).await?;
                    if utilization >= card.threshold {
                        self.last_trigger.write().await.insert(lp.to_string(), now);
                    }
                    warn!(
                        lp = %lp,
                        card_id = %card.id,
                        margin = %utilization,
                        "⏰ [RESUME] ignore window expired, card awaiting human decision again"
                    );
                    Ok(false)
                }
            }
        }
    }

    /// Request and commit an initial report. Failures are recorded in the
    /// card's history and retried on a later cycle; they never change status.
    async fn request_initial_report(
        &self,
        card_id: &str,
        lp: &str,
        margin_level: Decimal,
        threshold: Decimal,
    ) {
        match self
            .analysis
            .request_initial(lp, margin_level, threshold)
            .await
        {
            Ok(report) => {
                let thread_id = report.thread_id.clone();
                match self
                    .store
                    .attach_report(card_id, ReportKind::Initial, Some(&thread_id), report.raw, Utc::now())
                    .await
                {
                    Ok(_) => info!(
                        card_id = %card_id,
                        thread_id = %thread_id,
                        "📄 [REPORT] initial report stored"
                    ),
                    Err(e) => error!(card_id = %card_id, error = %e, "📄 [REPORT] failed to store report"),
                }
            }
            Err(e) => {
                warn!(
                    card_id = %card_id,
                    error = %e,
                    "📄 [REPORT] initial report failed, will retry on a later cycle"
                );
                if let Err(store_err) = self
                    .store
                    .record_system_note(card_id, "initial-report-failed", e.to_string(), Utc::now())
                    .await
                {
                    error!(card_id = %card_id, error = %store_err, "📄 [REPORT] failed to record error");
                }
            }
        }
    }

    /// Emit reminders for all awaiting cards that are due.
    async fn notification_pass(&self, now: DateTime<Utc>) {
        for card in self.store.awaiting().await {
            if !self.policy.is_due(&card, now) {
                continue;
            }
            match self.store.mark_notified(&card.id, now).await {
                Ok(updated) => Self::emit_reminder(&updated),
                // A human moved the card between snapshot and commit
                Err(CardError::InvalidTransition { .. }) => {
                    debug!(card_id = %card.id, "🔔 [NOTIFY] card no longer awaiting, reminder dropped")
                }
                Err(e) => error!(card_id = %card.id, error = %e, "🔔 [NOTIFY] failed to record reminder"),
            }
        }
    }

    /// Structured reminder log for downstream alert routing.
    fn emit_reminder(card: &AlertCard) {
        let payload = serde_json::json!({
            "card_id": card.id,
            "lp": card.lp,
            "status": card.status,
            "margin_level": card.margin_level,
            "threshold": card.threshold,
            "notifications_sent": card.notifications_sent,
        });
        warn!(target: "margin_alert", "MARGIN_ALERT: {}", payload);
    }

    // ==================== Human operations ====================

    /// Record a human decision on an awaiting card and request a recheck.
    ///
    /// Rejected with a validation error when the card never got an initial
    /// report (`thread_id` missing); that rejection is itself recorded in the
    /// card's history so operators can see why no recheck happened.
    pub async fn submit_feedback(
        &self,
        card_id: &str,
        decision: &str,
        notes: &str,
    ) -> Result<AlertCard, CardError> {
        let now = Utc::now();
        let card = self
            .store
            .get(card_id)
            .await
            .ok_or_else(|| CardError::UnknownCard(card_id.to_string()))?;

        let thread_id = match &card.thread_id {
            Some(thread_id) => thread_id.clone(),
            None => {
                self.store
                    .record_system_note(
                        card_id,
                        "feedback-rejected",
                        "feedback received before an initial report succeeded; recheck not requested"
                            .to_string(),
                        now,
                    )
                    .await?;
                return Err(CardError::MissingThreadId(card_id.to_string()));
            }
        };

        // Commit the decision first; history order follows commit order
        self.store
            .record_feedback(card_id, decision, notes, now)
            .await?;
        info!(card_id = %card_id, decision = %decision, "🧑 [FEEDBACK] recorded, requesting recheck");

        // External call runs without any store lock held
        match self.analysis.request_recheck(&thread_id).await {
            Ok(report) => {
                let thread_id = report.thread_id.clone();
                self.store
                    .attach_report(card_id, ReportKind::Recheck, Some(&thread_id), report.raw, Utc::now())
                    .await
            }
            Err(e) => {
                warn!(card_id = %card_id, error = %e, "🧑 [FEEDBACK] recheck failed");
                self.store
                    .record_system_note(card_id, "recheck-failed", e.to_string(), Utc::now())
                    .await?;
                self.store
                    .get(card_id)
                    .await
                    .ok_or_else(|| CardError::UnknownCard(card_id.to_string()))
            }
        }
    }

    /// Snooze a card for a duration or until an explicit instant.
    pub async fn ignore_card(
        &self,
        card_id: &str,
        window: IgnoreWindow,
    ) -> Result<AlertCard, CardError> {
        let now = Utc::now();
        let until = match window {
            IgnoreWindow::Duration(secs) => {
                if secs == 0 {
                    return Err(CardError::InvalidIgnoreWindow(
                        "ignore duration must be positive".to_string(),
                    ));
                }
                let delta = i64::try_from(secs)
                    .ok()
                    .and_then(Duration::try_seconds)
                    .ok_or_else(|| {
                        CardError::InvalidIgnoreWindow(format!(
                            "ignore duration out of range: {}s",
                            secs
                        ))
                    })?;
                now.checked_add_signed(delta).ok_or_else(|| {
                    CardError::InvalidIgnoreWindow(format!(
                        "ignore duration out of range: {}s",
                        secs
                    ))
                })?
            }
            IgnoreWindow::Until(until) => until,
        };

        let card = self.store.set_ignore(card_id, until, now).await?;
        info!(card_id = %card_id, until = %until, "🔕 [IGNORE] card snoozed");
        Ok(card)
    }

    /// Force a card to a human-chosen status with a free-form reason.
    pub async fn override_card(
        &self,
        card_id: &str,
        target: CardStatus,
        reason: &str,
    ) -> Result<AlertCard, CardError> {
        let card = self
            .store
            .override_status(card_id, target, reason, Utc::now())
            .await?;
        warn!(card_id = %card_id, target = %target, reason = %reason, "✋ [OVERRIDE] status forced");
        Ok(card)
    }

    /// Snapshot of a single card (full history and reports).
    pub async fn get_card(&self, card_id: &str) -> Option<AlertCard> {
        self.store.get(card_id).await
    }

    /// List cards, optionally filtered by status and/or LP.
    pub async fn list_cards(
        &self,
        status: Option<CardStatus>,
        lp: Option<&str>,
    ) -> Vec<AlertCard> {
        self.store.list(status, lp).await
    }
}
