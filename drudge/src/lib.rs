//! Drudge - background task execution for application servers.
//!
//! A substrate that lets request-handling code enqueue units of work
//! for asynchronous execution, schedule recurring work by cron
//! expression, track and query job outcomes, and retry or cancel
//! previously submitted jobs. A companion concern is short-lived
//! in-process caching with a stale-while-revalidate contract.
//!
//! # Core Concepts
//!
//! - **Job**: a named, invokable unit of background work built with
//!   [`Job::new`]. Jobs can run inline, be enqueued for immediate or
//!   delayed pickup, or be registered on a cron cadence.
//!
//! - **Runtime**: the explicit [`JobRuntime`] value wiring a queue
//!   backend, schedule store, context provider and job registry
//!   together; constructed once at process startup via
//!   [`JobRuntime::builder`].
//!
//! - **Queue**: the [`QueueBackend`] trait abstracts the durable queue;
//!   [`QueueClient`] is the request-side façade for enqueueing and for
//!   status, retry and cancel operations.
//!
//! - **Worker / Scheduler**: [`Worker`] is the long-running consumer
//!   executing jobs one at a time; [`SchedulerProcess`] turns cron
//!   registrations into Job Instances.
//!
//! - **Caches**: [`KeyCache`] and [`Cache`] avoid synchronous
//!   recomputation of expensive values on every access.
//!
//! # Feature Flags
//!
//! - `postgres` - PostgreSQL persistence support via sqlx
//! - `metrics` - Prometheus metrics support
//!
//! # Example
//!
//! ```ignore
//! use drudge::*;
//!
//! let send_reminder = Job::new("send_reminder", |args: JobArgs| async move {
//!     // ... do the work ...
//!     Ok(serde_json::json!({ "status": "success" }))
//! });
//!
//! let runtime = JobRuntime::builder()
//!     .with_queue_backend(backend)
//!     .with_schedule_store(schedules)
//!     .with_context_provider(context)
//!     .register(send_reminder.clone())
//!     .build()?;
//!
//! send_reminder
//!     .enqueue_now(&runtime, JobArgs::new().with_kwarg("user_id", 7))
//!     .await?;
//! ```

/// In-process caches with a stale-while-revalidate contract.
///
/// The `cache` module provides [`KeyCache`] for keyed values with
/// explicit staleness detection and [`Cache`] for a singleton
/// periodically-refreshed value.
pub mod cache;

/// Configuration structures for runtime and persistence settings.
///
/// The `config` module defines [`RuntimeConfig`] (backend target and
/// named-queue lists) and [`PersistenceConfig`] for pool tuning.
pub mod config;

/// Execution-context guard.
///
/// The `context` module defines the [`ContextProvider`] collaborator
/// interface and the [`ContextGuard`] that ensures jobs run with the
/// ambient application context they depend on.
pub mod context;

/// Core job definitions.
///
/// The `job` module defines:
/// - [`Job`] - the wrapped unit of work with its submission operations
/// - [`JobId`] / [`JobState`] - Job Instance identity and lifecycle
/// - [`JobArgs`] / [`JobCall`] - what travels through the queue
/// - [`JobHandle`] - handle returned from enqueue operations
pub mod job;

/// Queue operations and status snapshots.
///
/// The `queue` module defines the [`QueueBackend`] trait for durable
/// queue backends and the [`QueueClient`] façade, plus the status
/// types [`JobStatus`], [`QueueInfo`] and [`JobActionResult`].
pub mod queue;

/// Explicit job lookup table.
///
/// The `registry` module provides [`JobRegistry`], the name-to-handler
/// table worker processes consult to resolve queued calls.
pub mod registry;

/// Cron scheduling.
///
/// The `schedule` module defines [`CronRegistration`], the
/// [`ScheduleStore`] trait, the [`CatchUpPolicy`] configuration choice,
/// and the due-tick computation used by the scheduler process.
pub mod schedule;

/// Runtime orchestration.
///
/// The `runtime` module provides [`JobRuntime`] and its builder,
/// the [`Worker`] and [`SchedulerProcess`] loops, and
/// [`ShutdownToken`] for graceful shutdown signaling.
pub mod runtime;

/// Tracing span helpers and lifecycle event recording.
pub mod telemetry;

#[cfg(feature = "metrics")]
/// Prometheus metrics, enabled by the `metrics` feature.
pub mod metrics;

#[cfg(feature = "postgres")]
/// PostgreSQL persistence, enabled by the `postgres` feature.
///
/// The `persistence` module provides [`persistence::PostgresQueueBackend`]
/// and [`persistence::PostgresScheduleStore`].
pub mod persistence;

pub use cache::{Cache, CacheError, CacheValue, KeyCache};
pub use config::{PersistenceConfig, RuntimeConfig};
pub use context::{ContextGuard, ContextHandle, ContextProvider};
pub use job::{Job, JobArgs, JobCall, JobHandle, JobId, JobOutput, JobState};
pub use queue::{
    ActiveJob, JobActionOutcome, JobActionResult, JobRecord, JobStatus, JobSummary, QueueBackend,
    QueueClient, QueueInfo, RetryDisposition,
};
pub use registry::{JobRegistry, RegistryError};
pub use runtime::{
    ExecutionOutcome, JobRuntime, JobRuntimeBuilder, SchedulerProcess, ShutdownToken, Worker,
    WorkerConfig,
};
pub use schedule::{
    due_ticks, parse_cron, CatchUpPolicy, CronRegistration, RegistrationId, ScheduleEntry,
    SchedulerConfig, ScheduleStore,
};
