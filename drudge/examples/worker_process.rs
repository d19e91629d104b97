//! Worker process entry point.
//!
//! Attaches to the queue set from `DRUDGE_QUEUES` (comma-separated,
//! default "default") and executes jobs until interrupted. Runs over
//! the in-memory backend from drudge-testkit so the example is
//! self-contained; a production worker would build the same runtime
//! over `persistence::PostgresQueueBackend` (feature `postgres`).

use std::sync::Arc;

use drudge::{JobArgs, JobRuntime, RuntimeConfig, WorkerConfig};
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

    // Seed some work so the loop has something to chew on.
    job.enqueue_now(&runtime, JobArgs::new().with_kwarg("user_id", 7))
        .await?;
    job.enqueue_after(
        &runtime,
        chrono::Duration::seconds(10),
        JobArgs::new().with_kwarg("user_id", 8),
    )
    .await?;

    let worker = runtime.worker(
        WorkerConfig::new(format!("worker-{}", std::process::id())).with_poll_interval(250),
    );
    let shutdown = runtime.shutdown_token();
    let handle = tokio::spawn(async move { worker.run(shutdown).await });

    tokio::signal::ctrl_c().await?;
    runtime.shutdown();
    handle.await?;

    Ok(())
}
