//! Scheduler process entry point.
//!
//! Registers the system-level recurring jobs once at startup, then
//! polls due cron registrations until interrupted. Pair it with one or
//! more `worker_process` instances consuming the same backend.

use std::sync::Arc;

use drudge::{JobArgs, JobRuntime, RuntimeConfig};
use drudge_testkit::{
    send_reminder_job, MemoryQueueBackend, MemoryScheduleStore, RecordingContextProvider,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = RuntimeConfig::from_env();
    let job = send_reminder_job();

    let runtime = JobRuntime::builder()
        .with_config(config)
        .with_queue_backend(Arc::new(MemoryQueueBackend::new()))
        .with_schedule_store(Arc::new(MemoryScheduleStore::new()))
        .with_context_provider(Arc::new(RecordingContextProvider::new()))
        .register(job.clone())
        .build()?;

    // System-level recurring jobs. 3:00 PM UTC Fridays, plus a Tuesday
    // run to show that registrations are additive.
    job.schedule(&runtime, "0 15 * * FRI", JobArgs::new())
        .await?;
    job.schedule(&runtime, "0 15 * * TUE", JobArgs::new())
        .await?;

    let scheduler = runtime.scheduler_process();
    let shutdown = runtime.shutdown_token();
    let handle = tokio::spawn(async move { scheduler.run(shutdown).await });

    tokio::signal::ctrl_c().await?;
    runtime.shutdown();
    handle.await?;

    Ok(())
}
