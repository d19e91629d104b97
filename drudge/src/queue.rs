use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::Instrument;

use crate::job::{JobCall, JobHandle, JobId, JobState};
use crate::telemetry;

/// Trait for durable queue backends that own Job Instance state.
///
/// Implementors provide storage, delayed availability, pickup mutual
/// exclusion across worker processes, and the lifecycle transitions
/// recorded by workers. This layer never caches job state locally; the
/// backend is the sole source of truth.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Enqueue a call for immediate pickup.
    async fn enqueue(&self, queue: &str, call: JobCall) -> anyhow::Result<JobHandle>;

    /// Enqueue a call to become available no earlier than `now + delay`.
    ///
    /// A zero (or negative) delay must behave exactly like `enqueue`.
    async fn enqueue_in(
        &self,
        queue: &str,
        delay: Duration,
        call: JobCall,
    ) -> anyhow::Result<JobHandle>;

    /// Fetch the full record of a Job Instance. Unknown ids are errors.
    async fn fetch(&self, job_id: JobId) -> anyhow::Result<JobRecord>;

    /// Transition a `failed` job back to `queued` for re-execution.
    ///
    /// Jobs in any other state are left untouched and reported as
    /// [`RetryDisposition::NotFailed`].
    async fn retry(&self, job_id: JobId) -> anyhow::Result<RetryDisposition>;

    /// Transition a queued/started job to `cancelled`.
    ///
    /// Idempotent on already-terminal jobs. Once cancelled, late worker
    /// writes for the same job must be ignored: cancellation takes
    /// precedence over a concurrent completion.
    async fn cancel(&self, job_id: JobId) -> anyhow::Result<()>;

    /// Snapshot of jobs waiting in a queue.
    async fn list_pending(&self, queue: &str) -> anyhow::Result<Vec<JobSummary>>;

    /// Number of jobs currently waiting in a queue.
    async fn queue_len(&self, queue: &str) -> anyhow::Result<usize>;

    /// Pull the first available job from the given queue set, marking
    /// it `started`. Returns `None` when no job is due.
    async fn dequeue(&self, queues: &[String], worker_id: &str)
        -> anyhow::Result<Option<ActiveJob>>;

    /// Record successful completion of a started job.
    async fn record_finished(&self, job_id: JobId, result: Value) -> anyhow::Result<()>;

    /// Record failure of a started job, capturing the error detail.
    async fn record_failed(&self, job_id: JobId, error: &str) -> anyhow::Result<()>;
}

/// Full backend-owned snapshot of one Job Instance.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub queue: String,
    pub call: JobCall,
    pub state: JobState,
    /// Present iff `state == Finished`.
    pub result: Option<Value>,
    /// Present iff `state == Failed`.
    pub failure: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Caller-facing status view, with failure detail sanitized.
    pub fn status(&self) -> JobStatus {
        JobStatus {
            id: self.id,
            state: self.state,
            result: self.result.clone(),
            failure: self.failure.as_deref().map(sanitize_failure),
            created_at: self.created_at,
            started_at: self.started_at,
            ended_at: self.ended_at,
        }
    }
}

/// Status view of one Job Instance returned by lookups.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobStatus {
    pub id: JobId,
    pub state: JobState,
    pub result: Option<Value>,
    pub failure: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// One pending job in a queue snapshot.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: JobId,
    pub job_name: String,
    pub created_at: DateTime<Utc>,
    pub state: JobState,
}

/// Snapshot of a queue: its name, depth, and pending jobs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueInfo {
    pub name: String,
    pub length: usize,
    pub jobs: Vec<JobSummary>,
}

/// Backend answer to a retry request.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum RetryDisposition {
    Retried,
    NotFailed,
}

/// A job pulled by a worker: the id to report against plus the call.
#[derive(Clone, Debug)]
pub struct ActiveJob {
    pub id: JobId,
    pub queue: String,
    pub call: JobCall,
}

/// Outcome of a retry/cancel request, reported as a value.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobActionOutcome {
    Retried,
    NotRetryable,
    Cancelled,
    Error,
}

/// Structured result of retry/cancel operations. These never raise;
/// backend trouble is folded into `outcome = Error`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobActionResult {
    pub outcome: JobActionOutcome,
    pub job_id: JobId,
    pub error: Option<String>,
}

impl JobActionResult {
    fn ok(outcome: JobActionOutcome, job_id: JobId) -> Self {
        Self {
            outcome,
            job_id,
            error: None,
        }
    }

    fn rejected(outcome: JobActionOutcome, job_id: JobId, error: impl Into<String>) -> Self {
        Self {
            outcome,
            job_id,
            error: Some(error.into()),
        }
    }
}

/// Thin façade over a [`QueueBackend`] bound to one named queue.
///
/// Enqueue operations propagate backend errors; a submission must
/// never silently no-op. Status and queue-info lookups return `None`
/// on any trouble (unknown id, backend unreachable): callers treat
/// absence of data and backend errors as equally "unknown", never
/// inferring job failure from a lookup error.
#[derive(Clone)]
pub struct QueueClient {
    backend: Arc<dyn QueueBackend>,
    queue: String,
}

impl QueueClient {
    pub fn new(backend: Arc<dyn QueueBackend>, queue: impl Into<String>) -> Self {
        Self {
            backend,
            queue: queue.into(),
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.queue
    }

    /// Submit a call for immediate pickup.
    pub async fn enqueue(&self, call: JobCall) -> anyhow::Result<JobHandle> {
        let span = telemetry::job_enqueue_span(&self.queue, &call.job_name);
        async {
            let handle = self.backend.enqueue(&self.queue, call).await?;
            telemetry::record_job_enqueued(&self.queue, &handle.job_name);
            Ok(handle)
        }
        .instrument(span)
        .await
    }

    /// Submit a call for execution no earlier than `now + delay`.
    pub async fn enqueue_in(&self, delay: Duration, call: JobCall) -> anyhow::Result<JobHandle> {
        let span = telemetry::job_enqueue_span(&self.queue, &call.job_name);
        async {
            let handle = self.backend.enqueue_in(&self.queue, delay, call).await?;
            tracing::debug!(delay_ms = delay.num_milliseconds(), "delayed availability");
            telemetry::record_job_enqueued(&self.queue, &handle.job_name);
            Ok(handle)
        }
        .instrument(span)
        .await
    }

    /// Look up the status of a Job Instance. `None` means the status is
    /// unavailable, not that the job failed.
    pub async fn job_status(&self, job_id: JobId) -> Option<JobStatus> {
        match self.backend.fetch(job_id).await {
            Ok(record) => Some(record.status()),
            Err(err) => {
                tracing::error!(job_id = %job_id, error = %err, "error getting job status");
                None
            }
        }
    }

    /// Snapshot of this queue's name, length, and pending jobs. `None`
    /// when the backend cannot answer.
    pub async fn queue_info(&self) -> Option<QueueInfo> {
        let length = match self.backend.queue_len(&self.queue).await {
            Ok(length) => length,
            Err(err) => {
                tracing::error!(queue = %self.queue, error = %err, "error getting queue info");
                return None;
            }
        };
        match self.backend.list_pending(&self.queue).await {
            Ok(jobs) => Some(QueueInfo {
                name: self.queue.clone(),
                length,
                jobs,
            }),
            Err(err) => {
                tracing::error!(queue = %self.queue, error = %err, "error listing pending jobs");
                None
            }
        }
    }

    /// Re-queue a failed job. Only valid in the `failed` state; other
    /// states are reported as not retryable and left untouched.
    pub async fn retry(&self, job_id: JobId) -> JobActionResult {
        match self.backend.retry(job_id).await {
            Ok(RetryDisposition::Retried) => {
                tracing::info!(job_id = %job_id, "job re-queued for retry");
                JobActionResult::ok(JobActionOutcome::Retried, job_id)
            }
            Ok(RetryDisposition::NotFailed) => JobActionResult::rejected(
                JobActionOutcome::NotRetryable,
                job_id,
                "job is not in failed state",
            ),
            Err(err) => {
                tracing::error!(job_id = %job_id, error = %err, "error retrying job");
                JobActionResult::rejected(JobActionOutcome::Error, job_id, err.to_string())
            }
        }
    }

    /// Cancel a queued/started job. Idempotent: cancelling an
    /// already-terminal job reports the attempt without erroring.
    pub async fn cancel(&self, job_id: JobId) -> JobActionResult {
        match self.backend.cancel(job_id).await {
            Ok(()) => {
                tracing::info!(job_id = %job_id, "job cancelled");
                JobActionResult::ok(JobActionOutcome::Cancelled, job_id)
            }
            Err(err) => {
                tracing::error!(job_id = %job_id, error = %err, "error cancelling job");
                JobActionResult::rejected(JobActionOutcome::Error, job_id, err.to_string())
            }
        }
    }
}

impl std::fmt::Debug for QueueClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueClient")
            .field("queue", &self.queue)
            .finish()
    }
}

/// Reduce failure detail to its first line. Tracebacks can carry
/// sensitive values in frames below the message.
pub(crate) fn sanitize_failure(raw: &str) -> String {
    let first_line = raw.lines().next().unwrap_or_default();
    format!("Error: {first_line}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_failure_keeps_first_line_only() {
        let raw = "connection refused\n  at worker.rs:10\n  at runtime.rs:42";
        assert_eq!(sanitize_failure(raw), "Error: connection refused");
    }

    #[test]
    fn sanitize_failure_of_empty_string() {
        assert_eq!(sanitize_failure(""), "Error: ");
    }

    #[test]
    fn record_status_sanitizes_failure() {
        let record = JobRecord {
            id: JobId::new(),
            queue: "default".into(),
            call: JobCall::new("send_reminder", Default::default()),
            state: JobState::Failed,
            result: None,
            failure: Some("boom\nframe 1\nframe 2".into()),
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            ended_at: Some(Utc::now()),
        };

        let status = record.status();
        assert_eq!(status.failure.as_deref(), Some("Error: boom"));
        assert_eq!(status.state, JobState::Failed);
    }
}
