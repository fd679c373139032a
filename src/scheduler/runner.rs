//! Reminder scheduler background loop.
//!
//! Each tick claims due reminders from the store, fans each one out through
//! the router, folds the per-channel results into the audit log and marks the
//! reminder fired. Delivery is single-attempt: a failed channel is recorded in
//! `last_error` and never retried.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::notify::NotificationRouter;
use crate::reminders::{AuditEntry, ClaimPolicy, Reminder, ReminderStore, StoreError, now_epoch_secs};

/// Default interval between ticks (seconds).
pub const DEFAULT_INTERVAL_SECS: u64 = 5;

/// `[scheduler]` config section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SchedulerConfig {
    pub interval_secs: u64,
    /// Per-channel delivery timeout.
    pub channel_timeout_secs: u64,
    pub claim_batch_size: usize,
    pub claim_lease_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let claim = ClaimPolicy::default();
        Self {
            interval_secs: DEFAULT_INTERVAL_SECS,
            channel_timeout_secs: 10,
            claim_batch_size: claim.batch_size,
            claim_lease_secs: claim.lease_secs,
        }
    }
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn channel_timeout(&self) -> Duration {
        Duration::from_secs(self.channel_timeout_secs.max(1))
    }

    pub fn claim_policy(&self) -> ClaimPolicy {
        ClaimPolicy {
            batch_size: self.claim_batch_size,
            lease_secs: self.claim_lease_secs,
        }
    }
}

/// Counters from one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Reminders claimed this tick.
    pub claimed: usize,
    /// Reminders marked fired.
    pub fired: usize,
    /// Channel deliveries that failed.
    pub failed_deliveries: usize,
    /// Storage writes that failed after delivery.
    pub record_failures: usize,
}

/// Polls the store and dispatches due reminders.
pub struct ReminderScheduler {
    store: Arc<ReminderStore>,
    router: Arc<NotificationRouter>,
    interval: Duration,
}

impl ReminderScheduler {
    pub fn new(store: Arc<ReminderStore>, router: Arc<NotificationRouter>) -> Self {
        Self {
            store,
            router,
            interval: Duration::from_secs(DEFAULT_INTERVAL_SECS),
        }
    }

    /// Override the wait between ticks.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// One claim/dispatch/record cycle at the current time.
    pub async fn run_once(&self) -> Result<TickReport, StoreError> {
        self.run_once_at(now_epoch_secs()).await
    }

    /// One claim/dispatch/record cycle at `now`.
    ///
    /// Only a failed claim aborts the tick. Delivery failures never do, and a
    /// storage failure while recording one reminder is logged and counted
    /// while the rest of the batch still goes out.
    pub async fn run_once_at(&self, now: u64) -> Result<TickReport, StoreError> {
        let claimed = self.store.claim_due_reminders(now)?;
        let mut report = TickReport {
            claimed: claimed.len(),
            ..TickReport::default()
        };

        for reminder in claimed {
            self.dispatch(&reminder, now, &mut report).await;
        }

        if report.claimed > 0 {
            info!(
                claimed = report.claimed,
                fired = report.fired,
                failed = report.failed_deliveries,
                record_failures = report.record_failures,
                "scheduler tick complete"
            );
        }
        Ok(report)
    }

    /// Deliver one reminder and record the outcome into `report`.
    ///
    /// The fired flag is written before the audit trail so a later storage
    /// failure cannot leave a delivered reminder claimable again.
    async fn dispatch(&self, reminder: &Reminder, now: u64, report: &mut TickReport) {
        let title = title_for(&reminder.kind);
        let results = self
            .router
            .send_all(reminder, &reminder.channels, &title, &reminder.message)
            .await;

        let failures: Vec<String> = results
            .iter()
            .filter(|r| !r.ok)
            .map(|r| {
                format!(
                    "{}: {}",
                    r.provider,
                    r.error.as_deref().unwrap_or("delivery failed")
                )
            })
            .collect();
        report.failed_deliveries += failures.len();

        let claimed_at = reminder.claimed_at.unwrap_or(now);
        let fired = match self.store.mark_fired(reminder.id, claimed_at, now) {
            Ok(true) => {
                report.fired += 1;
                debug!(reminder_id = reminder.id, "reminder fired");
                true
            }
            Ok(false) => {
                // Acknowledged, snoozed or canceled while delivery was in flight.
                info!(
                    reminder_id = reminder.id,
                    "reminder changed during delivery, keeping its state"
                );
                false
            }
            Err(e) => {
                report.record_failures += 1;
                error!(reminder_id = reminder.id, "failed to mark reminder fired: {e}");
                false
            }
        };

        let mut entries: Vec<AuditEntry> = results.iter().map(|r| r.to_audit_entry()).collect();
        if fired {
            entries.push(AuditEntry::new(
                now,
                "fired",
                "scheduler",
                serde_json::json!({
                    "channels": reminder.channels,
                    "delivered": results.len() - failures.len(),
                    "failed": failures.len(),
                }),
            ));
        }
        if let Err(e) = self.store.append_audit_log(reminder.id, entries) {
            report.record_failures += 1;
            error!(reminder_id = reminder.id, "failed to append delivery audit: {e}");
        }

        if !failures.is_empty() {
            let message = failures.join("; ");
            warn!(reminder_id = reminder.id, "delivery failed: {message}");
            if let Err(e) = self.store.mark_error(reminder.id, &message) {
                report.record_failures += 1;
                error!(reminder_id = reminder.id, "failed to record delivery error: {e}");
            }
        }
    }

    /// Start the background loop. Stop it with [`SchedulerHandle::stop`].
    ///
    /// A tick that is dispatching finishes before the stop is observed; the
    /// wait between ticks is interrupted immediately.
    pub fn spawn(self) -> SchedulerHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let join = tokio::spawn(async move {
            info!(interval_ms = self.interval.as_millis() as u64, "reminder scheduler started");
            loop {
                if let Err(e) = self.run_once().await {
                    error!("scheduler tick failed: {e}");
                }
                tokio::select! {
                    () = token.cancelled() => break,
                    () = tokio::time::sleep(self.interval) => {}
                }
            }
            info!("reminder scheduler stopped");
        });

        SchedulerHandle { cancel, join }
    }
}

/// Handle to a running scheduler loop.
pub struct SchedulerHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signal the loop and wait for it to exit.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.join.await {
            warn!("scheduler task ended abnormally: {e}");
        }
    }

    /// Token that stops the loop when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

/// Notification title for a reminder kind.
pub fn title_for(kind: &str) -> String {
    match kind.trim() {
        "" | "reminder" => "Reminder".to_owned(),
        "goal" => "Goal check-in".to_owned(),
        "briefing" => "Briefing".to_owned(),
        other => {
            let mut chars = other.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => "Reminder".to_owned(),
            }
        }
    }
}
