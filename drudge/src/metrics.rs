//! Prometheus metrics, compiled behind the `metrics` feature flag.
//!
//! # Metrics
//!
//! ## Counters
//! - `drudge_jobs_enqueued_total` - Jobs submitted to the queue
//! - `drudge_jobs_executed_total` - Jobs executed by workers, by status
//! - `drudge_schedule_fired_total` - Job Instances created by cron ticks
//!
//! ## Gauges
//! - `drudge_queue_depth` - Current depth of named queues
//!
//! ## Histograms
//! - `drudge_job_duration_seconds` - Job execution duration
#![cfg(feature = "metrics")]

use prometheus::{exponential_buckets, CounterVec, GaugeVec, HistogramVec, Opts, Registry};
use std::sync::LazyLock;

/// Global Prometheus registry for drudge metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Counter for jobs submitted to the queue.
///
/// Labels: `queue`, `job`.
pub static JOBS_ENQUEUED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new("drudge_jobs_enqueued_total", "Total number of jobs enqueued");
    CounterVec::new(opts, &["queue", "job"])
        .expect("drudge_jobs_enqueued_total metric creation failed")
});

/// Counter for jobs executed to a terminal state by workers.
///
/// Labels: `job`, `status` (finished, failed).
pub static JOBS_EXECUTED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new("drudge_jobs_executed_total", "Total number of jobs executed");
    CounterVec::new(opts, &["job", "status"])
        .expect("drudge_jobs_executed_total metric creation failed")
});

/// Counter for Job Instances created by cron schedule ticks.
///
/// Labels: `job`.
pub static SCHEDULE_FIRED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "drudge_schedule_fired_total",
        "Total number of cron-triggered enqueues",
    );
    CounterVec::new(opts, &["job"]).expect("drudge_schedule_fired_total metric creation failed")
});

/// Gauge for current queue depth.
///
/// Labels: `queue`.
pub static QUEUE_DEPTH: LazyLock<GaugeVec> = LazyLock::new(|| {
    let opts = Opts::new("drudge_queue_depth", "Current depth of job queues");
    GaugeVec::new(opts, &["queue"]).expect("drudge_queue_depth metric creation failed")
});

/// Histogram for job execution duration in seconds.
///
/// Labels: `job`, `status`.
pub static JOB_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let buckets = exponential_buckets(0.001, 2.0, 15).expect("bucket creation failed");
    let opts = prometheus::HistogramOpts::new(
        "drudge_job_duration_seconds",
        "Job execution duration in seconds",
    )
    .buckets(buckets);
    HistogramVec::new(opts, &["job", "status"])
        .expect("drudge_job_duration_seconds metric creation failed")
});

/// Register all metrics with the global registry. Idempotent.
pub fn init_metrics() -> anyhow::Result<()> {
    let registry = &*REGISTRY;

    for metric in [
        Box::new(JOBS_ENQUEUED_TOTAL.clone()) as Box<dyn prometheus::core::Collector>,
        Box::new(JOBS_EXECUTED_TOTAL.clone()),
        Box::new(SCHEDULE_FIRED_TOTAL.clone()),
        Box::new(QUEUE_DEPTH.clone()),
        Box::new(JOB_DURATION_SECONDS.clone()),
    ] {
        if let Err(e) = registry.register(metric) {
            let msg = e.to_string();
            if !msg.contains("Duplicate metrics collector registration attempted") {
                return Err(e.into());
            }
        }
    }

    Ok(())
}

/// Helper to record a job enqueue event.
pub fn record_job_enqueued(queue: &str, job: &str) {
    JOBS_ENQUEUED_TOTAL.with_label_values(&[queue, job]).inc();
}

/// Helper to record a terminal job execution.
pub fn record_job_executed(job: &str, status: &str) {
    JOBS_EXECUTED_TOTAL.with_label_values(&[job, status]).inc();
}

/// Helper to record a cron-triggered enqueue.
pub fn record_schedule_fired(job: &str) {
    SCHEDULE_FIRED_TOTAL.with_label_values(&[job]).inc();
}

/// Helper to update the queue depth gauge.
pub fn set_queue_depth(queue: &str, depth: f64) {
    QUEUE_DEPTH.with_label_values(&[queue]).set(depth);
}

/// Helper to observe job duration.
pub fn observe_job_duration(job: &str, status: &str, duration_secs: f64) {
    JOB_DURATION_SECONDS
        .with_label_values(&[job, status])
        .observe(duration_secs);
}

/// Gather all registered metrics in Prometheus text format.
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode_to_string(&metric_families)
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_initialization_is_idempotent() {
        init_metrics().expect("metrics initialization should succeed");
        init_metrics().expect("second initialization should succeed");
    }

    #[test]
    fn record_helpers_do_not_panic() {
        record_job_enqueued("default", "send_reminder");
        record_job_executed("send_reminder", "finished");
        record_job_executed("send_reminder", "failed");
        record_schedule_fired("send_reminder");
        set_queue_depth("default", 3.0);
        observe_job_duration("send_reminder", "finished", 0.25);
    }

    #[test]
    fn gather_contains_registered_metrics() {
        init_metrics().expect("metrics initialization should succeed");
        record_job_enqueued("default", "send_reminder");

        let output = gather_metrics().expect("gather should succeed");
        assert!(output.contains("drudge_jobs_enqueued_total"));
    }
}
