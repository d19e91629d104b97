use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::ContextGuard;
use crate::job::run_guarded;
use crate::queue::{ActiveJob, QueueBackend};
use crate::registry::JobRegistry;
use crate::telemetry;

use super::ShutdownToken;

/// Configuration for one worker process.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Identifier reported to the backend on dequeue.
    pub worker_id: String,
    /// Queues to pull from, in pickup-preference order. Empty means
    /// "use the runtime's configured worker queues".
    pub queues: Vec<String>,
    /// Sleep between polls when no job is available, in milliseconds.
    pub poll_interval_ms: u64,
    /// Sleep after a backend error before polling again, in milliseconds.
    pub error_backoff_ms: u64,
}

impl WorkerConfig {
    pub fn new(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            queues: Vec::new(),
            poll_interval_ms: 500,
            error_backoff_ms: 5_000,
        }
    }

    pub fn with_queues(mut self, queues: Vec<String>) -> Self {
        self.queues = queues;
        self
    }

    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_error_backoff(mut self, ms: u64) -> Self {
        self.error_backoff_ms = ms;
        self
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::new("default-worker")
    }
}

/// Terminal result of one job execution, tagged at the worker boundary.
///
/// Handler errors are values here, not unwinds: the worker records the
/// failure on the Job Instance and the error detail has already been
/// logged with the job identity by the execution path.
#[derive(Clone, Debug)]
pub enum ExecutionOutcome {
    Finished(Value),
    Failed { error: String },
}

impl ExecutionOutcome {
    pub fn status_label(&self) -> &'static str {
        match self {
            ExecutionOutcome::Finished(_) => "finished",
            ExecutionOutcome::Failed { .. } => "failed",
        }
    }
}

/// Long-running consumer executing jobs strictly sequentially.
///
/// One worker per OS process; horizontal scaling is more worker
/// processes competing for jobs from the shared queue set. Pickup
/// mutual exclusion is the backend's responsibility. A worker that
/// dies mid-job leaves that instance `started`; there is no heartbeat
/// or reaping here.
pub struct Worker {
    backend: Arc<dyn QueueBackend>,
    registry: Arc<JobRegistry>,
    guard: ContextGuard,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(
        backend: Arc<dyn QueueBackend>,
        registry: Arc<JobRegistry>,
        guard: ContextGuard,
        config: WorkerConfig,
    ) -> Self {
        Self {
            backend,
            registry,
            guard,
            config,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Run until the shutdown token fires. A job already executing when
    /// shutdown is signaled runs to completion.
    pub async fn run(&self, shutdown: ShutdownToken) {
        tracing::info!(
            worker = %self.config.worker_id,
            queues = ?self.config.queues,
            "worker started"
        );

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            match self.run_once().await {
                Ok(true) => {}
                Ok(false) => {
                    let idle = tokio::time::Duration::from_millis(self.config.poll_interval_ms);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(idle) => {}
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        worker = %self.config.worker_id,
                        error = %err,
                        "worker poll failed"
                    );
                    let backoff = tokio::time::Duration::from_millis(self.config.error_backoff_ms);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }

        tracing::info!(worker = %self.config.worker_id, "worker stopped");
    }

    /// Pull and execute at most one job. Returns whether a job was
    /// processed, so callers can drain queues in tests and tools.
    pub async fn run_once(&self) -> anyhow::Result<bool> {
        let Some(active) = self
            .backend
            .dequeue(&self.config.queues, &self.config.worker_id)
            .await?
        else {
            return Ok(false);
        };

        let timer = telemetry::execution_timer();
        let outcome = self.execute(&active).await;

        let recorded = match &outcome {
            ExecutionOutcome::Finished(value) => {
                self.backend.record_finished(active.id, value.clone()).await
            }
            ExecutionOutcome::Failed { error } => {
                self.backend.record_failed(active.id, error).await
            }
        };
        if let Err(err) = recorded {
            tracing::warn!(
                job_id = %active.id,
                error = %err,
                "failed to record terminal job state"
            );
        }

        telemetry::record_job_executed(
            &active.call.job_name,
            outcome.status_label(),
            timer.elapsed_secs(),
        );
        Ok(true)
    }

    async fn execute(&self, active: &ActiveJob) -> ExecutionOutcome {
        let name = active.call.job_name.as_str();

        let Some(handler) = self.registry.resolve(name) else {
            tracing::error!(job_id = %active.id, job = name, "no registered handler for job");
            return ExecutionOutcome::Failed {
                error: format!("no registered handler for job `{name}`"),
            };
        };

        let execution = run_guarded(&self.guard, name, handler, active.call.args.clone());
        match telemetry::instrument_dispatch(active.id.to_string(), name, execution).await {
            Ok(value) => ExecutionOutcome::Finished(value),
            // `{:#}` keeps the cause chain on one line; status lookups
            // later reduce it to the first line anyway.
            Err(err) => ExecutionOutcome::Failed {
                error: format!("{err:#}"),
            },
        }
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("config", &self.config)
            .finish()
    }
}
