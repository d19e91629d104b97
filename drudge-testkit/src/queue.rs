use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use drudge::{
    ActiveJob, JobCall, JobHandle, JobId, JobRecord, JobState, JobSummary, QueueBackend,
    RetryDisposition,
};

/// In-memory implementation of the durable queue.
///
/// Implements the whole Job Instance state machine (delayed
/// availability, retry-from-failed, sticky cancellation) so worker
/// and client behavior can be exercised without infrastructure. Also
/// usable as the backend of a single-process deployment.
#[derive(Clone, Default)]
pub struct MemoryQueueBackend {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<JobId, StoredJob>,
    queues: HashMap<String, VecDeque<JobId>>,
}

struct StoredJob {
    record: JobRecord,
    available_at: DateTime<Utc>,
}

impl MemoryQueueBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test probe: current state of a job, if it exists.
    pub fn job_state(&self, job_id: JobId) -> Option<JobState> {
        self.inner
            .lock()
            .jobs
            .get(&job_id)
            .map(|stored| stored.record.state)
    }

    /// Test probe: due time of a job, if it exists.
    pub fn available_at(&self, job_id: JobId) -> Option<DateTime<Utc>> {
        self.inner
            .lock()
            .jobs
            .get(&job_id)
            .map(|stored| stored.available_at)
    }

    /// Test probe: snapshot of every stored record, oldest first.
    pub fn jobs(&self) -> Vec<JobRecord> {
        let inner = self.inner.lock();
        let mut records: Vec<JobRecord> = inner
            .jobs
            .values()
            .map(|stored| stored.record.clone())
            .collect();
        records.sort_by_key(|record| record.created_at);
        records
    }

    fn insert(&self, queue: &str, call: JobCall, available_at: DateTime<Utc>) -> JobHandle {
        let id = JobId::new();
        let now = Utc::now();
        let record = JobRecord {
            id,
            queue: queue.to_string(),
            call,
            state: JobState::Queued,
            result: None,
            failure: None,
            created_at: now,
            started_at: None,
            ended_at: None,
        };
        let handle = JobHandle {
            id,
            job_name: record.call.job_name.clone(),
            queue: queue.to_string(),
        };

        let mut inner = self.inner.lock();
        inner.jobs.insert(
            id,
            StoredJob {
                record,
                available_at,
            },
        );
        inner
            .queues
            .entry(queue.to_string())
            .or_default()
            .push_back(id);
        handle
    }
}

#[async_trait]
impl QueueBackend for MemoryQueueBackend {
    async fn enqueue(&self, queue: &str, call: JobCall) -> anyhow::Result<JobHandle> {
        Ok(self.insert(queue, call, Utc::now()))
    }

    async fn enqueue_in(
        &self,
        queue: &str,
        delay: Duration,
        call: JobCall,
    ) -> anyhow::Result<JobHandle> {
        let delay = delay.max(Duration::zero());
        Ok(self.insert(queue, call, Utc::now() + delay))
    }

    async fn fetch(&self, job_id: JobId) -> anyhow::Result<JobRecord> {
        let inner = self.inner.lock();
        match inner.jobs.get(&job_id) {
            Some(stored) => Ok(stored.record.clone()),
            None => anyhow::bail!("job {job_id} not found"),
        }
    }

    async fn retry(&self, job_id: JobId) -> anyhow::Result<RetryDisposition> {
        let mut inner = self.inner.lock();
        let Inner { jobs, queues } = &mut *inner;

        let Some(stored) = jobs.get_mut(&job_id) else {
            anyhow::bail!("job {job_id} not found");
        };
        if stored.record.state != JobState::Failed {
            return Ok(RetryDisposition::NotFailed);
        }

        stored.record.state = JobState::Queued;
        stored.record.result = None;
        stored.record.failure = None;
        stored.record.started_at = None;
        stored.record.ended_at = None;
        stored.available_at = Utc::now();
        queues
            .entry(stored.record.queue.clone())
            .or_default()
            .push_back(job_id);
        Ok(RetryDisposition::Retried)
    }

    async fn cancel(&self, job_id: JobId) -> anyhow::Result<()> {
        let mut inner = self.inner.lock();
        let Some(stored) = inner.jobs.get_mut(&job_id) else {
            anyhow::bail!("job {job_id} not found");
        };
        match stored.record.state {
            JobState::Queued | JobState::Started => {
                stored.record.state = JobState::Cancelled;
                stored.record.ended_at = Some(Utc::now());
            }
            // Already terminal: report the attempt without erroring.
            _ => {}
        }
        Ok(())
    }

    async fn list_pending(&self, queue: &str) -> anyhow::Result<Vec<JobSummary>> {
        let inner = self.inner.lock();
        let Some(deque) = inner.queues.get(queue) else {
            return Ok(Vec::new());
        };
        Ok(deque
            .iter()
            .filter_map(|id| inner.jobs.get(id))
            .filter(|stored| stored.record.state == JobState::Queued)
            .map(|stored| JobSummary {
                id: stored.record.id,
                job_name: stored.record.call.job_name.clone(),
                created_at: stored.record.created_at,
                state: stored.record.state,
            })
            .collect())
    }

    async fn queue_len(&self, queue: &str) -> anyhow::Result<usize> {
        Ok(self.list_pending(queue).await?.len())
    }

    async fn dequeue(
        &self,
        queues: &[String],
        worker_id: &str,
    ) -> anyhow::Result<Option<ActiveJob>> {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        let Inner { jobs, queues: deques } = &mut *inner;

        for name in queues {
            let Some(deque) = deques.get_mut(name) else {
                continue;
            };
            let mut idx = 0;
            while idx < deque.len() {
                let id = deque[idx];
                let Some(stored) = jobs.get_mut(&id) else {
                    deque.remove(idx);
                    continue;
                };
                // Drop entries cancelled (or otherwise moved on) while
                // they were still waiting in the deque.
                if stored.record.state != JobState::Queued {
                    deque.remove(idx);
                    continue;
                }
                if stored.available_at > now {
                    idx += 1;
                    continue;
                }

                deque.remove(idx);
                stored.record.state = JobState::Started;
                stored.record.started_at = Some(now);
                tracing::debug!(worker = worker_id, job_id = %id, "job picked up");
                return Ok(Some(ActiveJob {
                    id,
                    queue: name.clone(),
                    call: stored.record.call.clone(),
                }));
            }
        }
        Ok(None)
    }

    async fn record_finished(&self, job_id: JobId, result: serde_json::Value) -> anyhow::Result<()> {
        let mut inner = self.inner.lock();
        let Some(stored) = inner.jobs.get_mut(&job_id) else {
            anyhow::bail!("job {job_id} not found");
        };
        // Cancellation takes precedence: terminal writes only land on
        // jobs still in the started state.
        if stored.record.state != JobState::Started {
            tracing::debug!(job_id = %job_id, state = %stored.record.state, "completion write ignored");
            return Ok(());
        }
        stored.record.state = JobState::Finished;
        stored.record.result = Some(result);
        stored.record.ended_at = Some(Utc::now());
        Ok(())
    }

    async fn record_failed(&self, job_id: JobId, error: &str) -> anyhow::Result<()> {
        let mut inner = self.inner.lock();
        let Some(stored) = inner.jobs.get_mut(&job_id) else {
            anyhow::bail!("job {job_id} not found");
        };
        if stored.record.state != JobState::Started {
            tracing::debug!(job_id = %job_id, state = %stored.record.state, "failure write ignored");
            return Ok(());
        }
        stored.record.state = JobState::Failed;
        stored.record.failure = Some(error.to_string());
        stored.record.ended_at = Some(Utc::now());
        Ok(())
    }
}

impl std::fmt::Debug for MemoryQueueBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("MemoryQueueBackend")
            .field("jobs", &inner.jobs.len())
            .field("queues", &inner.queues.keys().collect::<Vec<_>>())
            .finish()
    }
}
