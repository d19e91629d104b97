//! Tracing instrumentation for job lifecycle events.
//!
//! Span helpers plus `record_*` functions that emit structured log
//! events and, when the `metrics` feature is enabled, update the
//! Prometheus metrics in [`crate::metrics`]. Everything here is a
//! cheap no-op at runtime when no subscriber is installed.

use std::future::Future;
use tracing::{info_span, Instrument, Span};

/// Span for enqueue operations, carrying the queue and job name.
#[must_use]
pub fn job_enqueue_span(queue: impl AsRef<str>, job_name: impl AsRef<str>) -> Span {
    info_span!(
        "drudge.enqueue",
        queue = %queue.as_ref(),
        job = %job_name.as_ref(),
    )
}

/// Span for one job execution inside a worker.
#[must_use]
pub fn job_dispatch_span(job_id: impl AsRef<str>, job_name: impl AsRef<str>) -> Span {
    info_span!(
        "drudge.dispatch",
        job_id = %job_id.as_ref(),
        job = %job_name.as_ref(),
    )
}

/// Span for one scheduler evaluation of a cron registration.
#[must_use]
pub fn schedule_fire_span(registration: impl AsRef<str>, cron: impl AsRef<str>) -> Span {
    info_span!(
        "drudge.schedule_fire",
        registration = %registration.as_ref(),
        cron = %cron.as_ref(),
    )
}

/// Instrument a future with a dispatch span.
pub fn instrument_dispatch<F>(
    job_id: impl AsRef<str>,
    job_name: impl AsRef<str>,
    future: F,
) -> impl Future<Output = F::Output>
where
    F: Future,
{
    let span = job_dispatch_span(job_id, job_name);
    future.instrument(span)
}

/// Record a job enqueue event.
pub fn record_job_enqueued(queue: impl AsRef<str>, job_name: impl AsRef<str>) {
    tracing::info!(
        queue = %queue.as_ref(),
        job = %job_name.as_ref(),
        "job enqueued"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_job_enqueued(queue.as_ref(), job_name.as_ref());
}

/// Record a terminal execution outcome with its duration.
pub fn record_job_executed(
    job_name: impl AsRef<str>,
    status: impl AsRef<str>,
    duration_secs: f64,
) {
    tracing::info!(
        job = %job_name.as_ref(),
        status = %status.as_ref(),
        duration_secs = duration_secs,
        "job executed"
    );

    #[cfg(feature = "metrics")]
    {
        crate::metrics::record_job_executed(job_name.as_ref(), status.as_ref());
        crate::metrics::observe_job_duration(job_name.as_ref(), status.as_ref(), duration_secs);
    }
}

/// Record a cron registration firing a new Job Instance.
pub fn record_schedule_fired(job_name: impl AsRef<str>) {
    tracing::info!(job = %job_name.as_ref(), "cron schedule fired");

    #[cfg(feature = "metrics")]
    crate::metrics::record_schedule_fired(job_name.as_ref());
}

/// Start a duration measurement for one job execution.
pub fn execution_timer() -> ExecutionTimer {
    ExecutionTimer {
        start: std::time::Instant::now(),
    }
}

/// Opaque handle measuring one job execution.
#[derive(Debug)]
pub struct ExecutionTimer {
    start: std::time::Instant,
}

impl ExecutionTimer {
    #[must_use]
    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}
