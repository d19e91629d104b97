use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::config::PersistenceConfig;
use crate::job::{JobArgs, JobCall, JobHandle, JobId, JobState};
use crate::queue::{ActiveJob, JobRecord, JobSummary, QueueBackend, RetryDisposition};
use crate::schedule::{CronRegistration, RegistrationId, ScheduleEntry, ScheduleStore};

/// Open a connection pool from persistence settings.
pub async fn connect(config: &PersistenceConfig) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(std::time::Duration::from_secs(config.acquire_timeout_seconds))
        .connect(&config.connection_string)
        .await?;
    Ok(pool)
}

/// Create the backing tables if they do not exist. Idempotent.
pub async fn ensure_schema(pool: &PgPool) -> anyhow::Result<()> {
    let statements = [
        r#"
        CREATE TABLE IF NOT EXISTS drudge_jobs (
            id UUID PRIMARY KEY,
            queue TEXT NOT NULL,
            job_name TEXT NOT NULL,
            args JSONB NOT NULL,
            state TEXT NOT NULL,
            result JSONB,
            failure TEXT,
            picked_by TEXT,
            available_at TIMESTAMPTZ NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            started_at TIMESTAMPTZ,
            ended_at TIMESTAMPTZ
        )
        "#,
        r#"
        CREATE INDEX IF NOT EXISTS drudge_jobs_dequeue_idx
            ON drudge_jobs (queue, state, available_at)
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS drudge_schedules (
            id UUID PRIMARY KEY,
            cron TEXT NOT NULL,
            queue TEXT NOT NULL,
            job_name TEXT NOT NULL,
            args JSONB NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            last_fired TIMESTAMPTZ
        )
        "#,
    ];

    for statement in statements {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

/// PostgreSQL-backed implementation of the durable queue.
///
/// Pickup mutual exclusion across worker processes comes from
/// `FOR UPDATE SKIP LOCKED`. Cancellation is sticky: a terminal
/// `cancelled` row is never overwritten by a late worker write.
#[derive(Clone, Debug)]
pub struct PostgresQueueBackend {
    pool: PgPool,
}

impl PostgresQueueBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn insert_job(
        &self,
        queue: &str,
        call: JobCall,
        available_at: DateTime<Utc>,
    ) -> anyhow::Result<JobHandle> {
        let job_id = JobId::new();
        let args_json = serde_json::to_value(&call.args)?;

        sqlx::query(
            r#"
            INSERT INTO drudge_jobs (
                id, queue, job_name, args, state,
                available_at, created_at
            )
            VALUES ($1, $2, $3, $4, 'queued', $5, NOW())
            "#,
        )
        .bind(job_id.0)
        .bind(queue)
        .bind(&call.job_name)
        .bind(&args_json)
        .bind(available_at)
        .execute(&self.pool)
        .await?;

        Ok(JobHandle {
            id: job_id,
            job_name: call.job_name,
            queue: queue.to_string(),
        })
    }

    fn record_from_row(row: &sqlx::postgres::PgRow) -> anyhow::Result<JobRecord> {
        let state: String = row.try_get("state")?;
        let args_json: serde_json::Value = row.try_get("args")?;
        let args: JobArgs = serde_json::from_value(args_json)?;

        Ok(JobRecord {
            id: JobId(row.try_get("id")?),
            queue: row.try_get("queue")?,
            call: JobCall {
                job_name: row.try_get("job_name")?,
                args,
            },
            state: state.parse::<JobState>()?,
            result: row.try_get("result")?,
            failure: row.try_get("failure")?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            ended_at: row.try_get("ended_at")?,
        })
    }

    async fn job_exists(&self, job_id: JobId) -> anyhow::Result<bool> {
        let row = sqlx::query("SELECT 1 FROM drudge_jobs WHERE id = $1")
            .bind(job_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl QueueBackend for PostgresQueueBackend {
    async fn enqueue(&self, queue: &str, call: JobCall) -> anyhow::Result<JobHandle> {
        self.insert_job(queue, call, Utc::now()).await
    }

    async fn enqueue_in(
        &self,
        queue: &str,
        delay: Duration,
        call: JobCall,
    ) -> anyhow::Result<JobHandle> {
        // Negative delays clamp to "now": a zero delay must behave
        // exactly like enqueue.
        let delay = delay.max(Duration::zero());
        self.insert_job(queue, call, Utc::now() + delay).await
    }

    async fn fetch(&self, job_id: JobId) -> anyhow::Result<JobRecord> {
        let row = sqlx::query(
            r#"
            SELECT id, queue, job_name, args, state, result, failure,
                   created_at, started_at, ended_at
            FROM drudge_jobs
            WHERE id = $1
            "#,
        )
        .bind(job_id.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Self::record_from_row(&row),
            None => anyhow::bail!("job {job_id} not found"),
        }
    }

    async fn retry(&self, job_id: JobId) -> anyhow::Result<RetryDisposition> {
        let updated = sqlx::query(
            r#"
            UPDATE drudge_jobs
            SET state = 'queued',
                result = NULL,
                failure = NULL,
                picked_by = NULL,
                started_at = NULL,
                ended_at = NULL,
                available_at = NOW()
            WHERE id = $1 AND state = 'failed'
            "#,
        )
        .bind(job_id.0)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 1 {
            return Ok(RetryDisposition::Retried);
        }
        if self.job_exists(job_id).await? {
            Ok(RetryDisposition::NotFailed)
        } else {
            anyhow::bail!("job {job_id} not found")
        }
    }

    async fn cancel(&self, job_id: JobId) -> anyhow::Result<()> {
        let updated = sqlx::query(
            r#"
            UPDATE drudge_jobs
            SET state = 'cancelled', ended_at = NOW()
            WHERE id = $1 AND state IN ('queued', 'started')
            "#,
        )
        .bind(job_id.0)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 && !self.job_exists(job_id).await? {
            anyhow::bail!("job {job_id} not found");
        }
        Ok(())
    }

    async fn list_pending(&self, queue: &str) -> anyhow::Result<Vec<JobSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT id, job_name, created_at, state
            FROM drudge_jobs
            WHERE queue = $1 AND state = 'queued'
            ORDER BY created_at
            "#,
        )
        .bind(queue)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let state: String = row.try_get("state")?;
                Ok(JobSummary {
                    id: JobId(row.try_get("id")?),
                    job_name: row.try_get("job_name")?,
                    created_at: row.try_get("created_at")?,
                    state: state.parse::<JobState>()?,
                })
            })
            .collect()
    }

    async fn queue_len(&self, queue: &str) -> anyhow::Result<usize> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM drudge_jobs WHERE queue = $1 AND state = 'queued'",
        )
        .bind(queue)
        .fetch_one(&self.pool)
        .await?;
        Ok(count as usize)
    }

    async fn dequeue(
        &self,
        queues: &[String],
        worker_id: &str,
    ) -> anyhow::Result<Option<ActiveJob>> {
        let row = sqlx::query(
            r#"
            UPDATE drudge_jobs
            SET state = 'started', started_at = NOW(), picked_by = $2
            WHERE id = (
                SELECT id FROM drudge_jobs
                WHERE queue = ANY($1)
                  AND state = 'queued'
                  AND available_at <= NOW()
                ORDER BY array_position($1, queue), available_at, created_at
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING id, queue, job_name, args
            "#,
        )
        .bind(queues)
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let args_json: serde_json::Value = row.try_get("args")?;
        Ok(Some(ActiveJob {
            id: JobId(row.try_get("id")?),
            queue: row.try_get("queue")?,
            call: JobCall {
                job_name: row.try_get("job_name")?,
                args: serde_json::from_value(args_json)?,
            },
        }))
    }

    async fn record_finished(&self, job_id: JobId, result: serde_json::Value) -> anyhow::Result<()> {
        let updated = sqlx::query(
            r#"
            UPDATE drudge_jobs
            SET state = 'finished', result = $2, ended_at = NOW()
            WHERE id = $1 AND state = 'started'
            "#,
        )
        .bind(job_id.0)
        .bind(&result)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            tracing::debug!(job_id = %job_id, "job no longer started, completion write ignored");
        }
        Ok(())
    }

    async fn record_failed(&self, job_id: JobId, error: &str) -> anyhow::Result<()> {
        let updated = sqlx::query(
            r#"
            UPDATE drudge_jobs
            SET state = 'failed', failure = $2, ended_at = NOW()
            WHERE id = $1 AND state = 'started'
            "#,
        )
        .bind(job_id.0)
        .bind(error)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            tracing::debug!(job_id = %job_id, "job no longer started, failure write ignored");
        }
        Ok(())
    }
}

/// PostgreSQL-backed store of cron registrations.
#[derive(Clone, Debug)]
pub struct PostgresScheduleStore {
    pool: PgPool,
}

impl PostgresScheduleStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ScheduleStore for PostgresScheduleStore {
    async fn register(&self, registration: CronRegistration) -> anyhow::Result<RegistrationId> {
        let args_json = serde_json::to_value(&registration.call.args)?;

        sqlx::query(
            r#"
            INSERT INTO drudge_schedules (id, cron, queue, job_name, args, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(registration.id.0)
        .bind(&registration.cron)
        .bind(&registration.queue)
        .bind(&registration.call.job_name)
        .bind(&args_json)
        .bind(registration.created_at)
        .execute(&self.pool)
        .await?;

        Ok(registration.id)
    }

    async fn entries(&self) -> anyhow::Result<Vec<ScheduleEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, cron, queue, job_name, args, created_at, last_fired
            FROM drudge_schedules
            ORDER BY created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let args_json: serde_json::Value = row.try_get("args")?;
                let id: Uuid = row.try_get("id")?;
                Ok(ScheduleEntry {
                    registration: CronRegistration {
                        id: RegistrationId(id),
                        cron: row.try_get("cron")?,
                        queue: row.try_get("queue")?,
                        call: JobCall {
                            job_name: row.try_get("job_name")?,
                            args: serde_json::from_value(args_json)?,
                        },
                        created_at: row.try_get("created_at")?,
                    },
                    last_fired: row.try_get("last_fired")?,
                })
            })
            .collect()
    }

    async fn mark_fired(&self, id: RegistrationId, tick: DateTime<Utc>) -> anyhow::Result<()> {
        // GREATEST keeps the watermark monotonic even if ticks are
        // marked out of order.
        sqlx::query(
            r#"
            UPDATE drudge_schedules
            SET last_fired = GREATEST(COALESCE(last_fired, to_timestamp(0)), $2)
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .bind(tick)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
