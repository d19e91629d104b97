use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::Instrument;

use crate::queue::QueueBackend;
use crate::schedule::{due_ticks, parse_cron, ScheduleEntry, SchedulerConfig, ScheduleStore};
use crate::telemetry;

use super::ShutdownToken;

/// Long-running process that turns cron registrations into Job
/// Instances.
///
/// The scheduler is the sole writer of cron-derived enqueues. Each poll
/// evaluates every registration against the current time; a fired tick
/// is recorded by its logical tick time, so waking up late never
/// produces a second enqueue for the same tick. Whether missed ticks
/// are replayed or collapsed is governed by the configured
/// [`crate::schedule::CatchUpPolicy`].
pub struct SchedulerProcess {
    store: Arc<dyn ScheduleStore>,
    backend: Arc<dyn QueueBackend>,
    config: SchedulerConfig,
}

impl SchedulerProcess {
    pub fn new(
        store: Arc<dyn ScheduleStore>,
        backend: Arc<dyn QueueBackend>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            backend,
            config,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Poll at the configured cadence until the shutdown token fires.
    pub async fn run(&self, shutdown: ShutdownToken) {
        tracing::info!(
            poll_interval_ms = self.config.poll_interval_ms,
            catch_up = ?self.config.catch_up,
            "scheduler started"
        );

        let interval = tokio::time::Duration::from_millis(self.config.poll_interval_ms);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {
                    if let Err(err) = self.poll_once(Utc::now()).await {
                        tracing::warn!(error = %err, "scheduler poll failed");
                    }
                }
            }
        }

        tracing::info!("scheduler stopped");
    }

    /// Evaluate every registration against `now`, enqueueing one Job
    /// Instance per due tick. Returns the number of enqueues produced.
    pub async fn poll_once(&self, now: DateTime<Utc>) -> anyhow::Result<usize> {
        let entries = self.store.entries().await?;
        let mut fired = 0;
        for entry in entries {
            fired += self.fire_due(&entry, now).await?;
        }
        Ok(fired)
    }

    async fn fire_due(&self, entry: &ScheduleEntry, now: DateTime<Utc>) -> anyhow::Result<usize> {
        let registration = &entry.registration;

        let schedule = match parse_cron(&registration.cron) {
            Ok(schedule) => schedule,
            Err(err) => {
                tracing::warn!(
                    registration = %registration.id,
                    error = %err,
                    "skipping unparseable cron registration"
                );
                return Ok(0);
            }
        };

        let after = entry.last_fired.unwrap_or(registration.created_at);
        let ticks = due_ticks(&schedule, after, now, self.config.catch_up);
        if ticks.is_empty() {
            return Ok(0);
        }

        let span =
            telemetry::schedule_fire_span(registration.id.to_string(), &registration.cron);
        async {
            for tick in &ticks {
                let handle = self
                    .backend
                    .enqueue(&registration.queue, registration.call.clone())
                    .await?;
                // Mark per tick: a partial failure must not re-fire the
                // ticks that already made it into the queue.
                self.store.mark_fired(registration.id, *tick).await?;
                telemetry::record_schedule_fired(&registration.call.job_name);
                tracing::debug!(tick = %tick, job_id = %handle.id, "schedule tick enqueued");
            }
            Ok(ticks.len())
        }
        .instrument(span)
        .await
    }
}

impl std::fmt::Debug for SchedulerProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerProcess")
            .field("config", &self.config)
            .finish()
    }
}
