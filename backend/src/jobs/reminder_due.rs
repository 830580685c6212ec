// Reminder Due Job - announces reminders whose due date has passed

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::events::{EventBus, EventEnvelope, EventType};
use crate::store::{CrmStore, StoreResult};

const BATCH_SIZE: i64 = 200;

pub struct ReminderDueJob {
    crm: Arc<dyn CrmStore>,
    bus: Arc<EventBus>,
    interval: Duration,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReminderScanResult {
    pub reminders_due: usize,
    pub events_published: usize,
}

impl ReminderDueJob {
    pub fn new(crm: Arc<dyn CrmStore>, bus: Arc<EventBus>, interval: Duration) -> Self {
        Self { crm, bus, interval }
    }

    /// One scan. Each due reminder is claimed before its event is published
    /// so a reminder is announced at most once even with several scanners.
    pub async fn run(&self) -> StoreResult<ReminderScanResult> {
        let now = Utc::now();
        let due = self.crm.due_reminders(now, BATCH_SIZE).await?;
        let mut result = ReminderScanResult {
            reminders_due: due.len(),
            ..Default::default()
        };

        for reminder in &due {
            if !self.crm.mark_reminder_announced(reminder.id, now).await? {
                debug!(reminder_id = %reminder.id, "Reminder already announced elsewhere");
                continue;
            }
            self.bus.publish(EventType::ReminderDue, &EventEnvelope::reminder_due(reminder));
            result.events_published += 1;
        }

        if result.events_published > 0 {
            info!(
                due = result.reminders_due,
                published = result.events_published,
                "Reminder scan complete"
            );
        }
        Ok(result)
    }

    /// Scan on a fixed interval until `shutdown` fires.
    pub async fn run_forever(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval_secs = self.interval.as_secs(), "Reminder due job started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.run().await {
                        error!("Reminder scan failed: {}", e);
                    }
                }
            }
        }
        warn!("Reminder due job stopped");
    }
}
