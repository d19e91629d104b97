//! Runtime wiring: the explicit [`JobRuntime`] value, worker and
//! scheduler process loops, and graceful shutdown signaling.

mod builder;
mod scheduler;
mod worker;

pub use builder::JobRuntimeBuilder;
pub use scheduler::SchedulerProcess;
pub use worker::{ExecutionOutcome, Worker, WorkerConfig};

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

use crate::config::RuntimeConfig;
use crate::context::{ContextGuard, ContextProvider};
use crate::queue::{QueueBackend, QueueClient};
use crate::registry::JobRegistry;
use crate::schedule::ScheduleStore;

/// Token for signaling graceful shutdown to long-running loops.
#[derive(Clone, Debug)]
pub struct ShutdownToken {
    inner: Arc<ShutdownTokenInner>,
}

#[derive(Debug)]
struct ShutdownTokenInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ShutdownTokenInner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Signal cancellation to every clone of this token.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Wait until cancelled.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.inner.notify.notified().await;
    }
}

impl Default for ShutdownToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Explicit, constructed handle to everything background work needs:
/// the queue backend, the schedule store, the context provider, the job
/// registry, and configuration.
///
/// One runtime is built at process startup via [`JobRuntime::builder`]
/// and passed to the components that need it: request handlers enqueue
/// through [`JobRuntime::client`], worker processes run
/// [`JobRuntime::worker`], the scheduler process runs
/// [`JobRuntime::scheduler_process`]. There is no process-global state;
/// dropping the runtime (after [`JobRuntime::shutdown`]) is teardown.
pub struct JobRuntime {
    config: RuntimeConfig,
    backend: Arc<dyn QueueBackend>,
    schedules: Arc<dyn ScheduleStore>,
    context: Arc<dyn ContextProvider>,
    registry: Arc<JobRegistry>,
    shutdown: ShutdownToken,
}

impl JobRuntime {
    /// Start building a runtime.
    pub fn builder() -> JobRuntimeBuilder {
        JobRuntimeBuilder::new()
    }

    pub(crate) fn new(
        config: RuntimeConfig,
        backend: Arc<dyn QueueBackend>,
        schedules: Arc<dyn ScheduleStore>,
        context: Arc<dyn ContextProvider>,
        registry: Arc<JobRegistry>,
    ) -> Self {
        Self {
            config,
            backend,
            schedules,
            context,
            registry,
            shutdown: ShutdownToken::new(),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn backend(&self) -> Arc<dyn QueueBackend> {
        Arc::clone(&self.backend)
    }

    pub fn schedules(&self) -> Arc<dyn ScheduleStore> {
        Arc::clone(&self.schedules)
    }

    pub fn registry(&self) -> Arc<JobRegistry> {
        Arc::clone(&self.registry)
    }

    /// Queue client bound to the default queue.
    pub fn client(&self) -> QueueClient {
        QueueClient::new(self.backend(), self.config.default_queue.clone())
    }

    /// Queue client bound to a specific named queue.
    pub fn client_for(&self, queue: impl Into<String>) -> QueueClient {
        QueueClient::new(self.backend(), queue)
    }

    /// Execution-context guard over this runtime's provider.
    pub fn guard(&self) -> ContextGuard {
        ContextGuard::new(Arc::clone(&self.context))
    }

    /// Build a worker over this runtime. A worker config with an empty
    /// queue list attaches to the runtime's configured worker queues.
    pub fn worker(&self, mut worker_config: WorkerConfig) -> Worker {
        if worker_config.queues.is_empty() {
            worker_config.queues = self.config.worker_queues.clone();
        }
        Worker::new(self.backend(), self.registry(), self.guard(), worker_config)
    }

    /// Build the scheduler process over this runtime.
    pub fn scheduler_process(&self) -> SchedulerProcess {
        SchedulerProcess::new(self.schedules(), self.backend(), self.config.scheduler.clone())
    }

    /// Shutdown token shared by loops started from this runtime.
    pub fn shutdown_token(&self) -> ShutdownToken {
        self.shutdown.clone()
    }

    /// Signal every loop started from this runtime to stop.
    pub fn shutdown(&self) {
        tracing::info!("job runtime shutting down");
        self.shutdown.cancel();
    }
}

impl fmt::Debug for JobRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRuntime")
            .field("config", &self.config)
            .field("jobs", &self.registry.names())
            .field("shutdown_cancelled", &self.shutdown.is_cancelled())
            .finish()
    }
}
