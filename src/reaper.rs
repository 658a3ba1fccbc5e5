use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::engine::Engine;
use crate::model::*;

/// Delivers appointment reminders. The WhatsApp gateway lives outside this
/// service; the default sender only logs.
#[async_trait]
pub trait ReminderSender: Send + Sync {
    async fn send(&self, appointment: &Appointment) -> Result<(), String>;
}

pub struct LogReminderSender;

#[async_trait]
impl ReminderSender for LogReminderSender {
    async fn send(&self, appointment: &Appointment) -> Result<(), String> {
        info!(
            appointment_id = %appointment.id,
            client = ?appointment.client_id,
            start = %format_instant(appointment.span.start),
            "reminder due"
        );
        Ok(())
    }
}

/// One pass: hand every due appointment to `sender` and mark it reminded.
/// Returns how many were marked.
pub async fn sweep_reminders(
    engine: &Engine,
    sender: &dyn ReminderSender,
    now: Ms,
    lead: Ms,
) -> usize {
    let mut sent = 0;
    for id in engine.collect_due_reminders(now, lead) {
        // Re-read: the appointment may have moved or been cancelled since the scan.
        let Some(appointment) = engine.get_appointment(id).await else {
            continue;
        };
        if !appointment.status.is_upcoming() || appointment.reminder_sent {
            continue;
        }
        if let Err(e) = sender.send(&appointment).await {
            tracing::warn!(appointment_id = %id, "reminder failed: {e}");
            metrics::counter!(crate::observability::REMINDERS_SENT_TOTAL, "status" => "error")
                .increment(1);
            continue;
        }
        match engine.mark_reminder_sent(id, now).await {
            Ok(()) => {
                sent += 1;
                metrics::counter!(crate::observability::REMINDERS_SENT_TOTAL, "status" => "ok")
                    .increment(1);
            }
            // Deleted in between: nothing left to mark.
            Err(e) => tracing::debug!("reminder skip {id}: {e}"),
        }
    }
    sent
}

/// Background task that periodically sends due reminders.
pub async fn run_reminder_sweeper(
    engine: Arc<Engine>,
    sender: Arc<dyn ReminderSender>,
    every: Duration,
    lead: Duration,
) {
    let lead_ms = Ms::try_from(lead.as_millis()).unwrap_or(Ms::MAX);
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let sent = sweep_reminders(&engine, sender.as_ref(), now_ms(), lead_ms).await;
        if sent > 0 {
            info!("sent {sent} reminders");
        }
    }
}

/// Background task that rewrites the WAL once enough appends piled up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => tracing::error!("WAL compaction failed: {e}"),
        }
    }
}
