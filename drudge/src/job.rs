use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::context::ContextGuard;
use crate::runtime::JobRuntime;
use crate::schedule::{parse_cron, CronRegistration, RegistrationId};

/// Unique identifier of one Job Instance, assigned at enqueue time.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a Job Instance. The queue backend is the sole
/// source of truth; this layer only reads and writes through it.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Started,
    Finished,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Started => "started",
            JobState::Finished => "finished",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }

    /// Terminal states are never left again, with one exception:
    /// `failed` can transition back to `queued` via retry.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Finished | JobState::Failed | JobState::Cancelled
        )
    }
}

impl Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobState::Queued),
            "started" => Ok(JobState::Started),
            "finished" => Ok(JobState::Finished),
            "failed" => Ok(JobState::Failed),
            "cancelled" => Ok(JobState::Cancelled),
            other => Err(anyhow::anyhow!("unknown job state: {other}")),
        }
    }
}

/// Positional and keyword arguments captured at enqueue time.
///
/// Arguments travel through the queue as JSON values, so anything a job
/// handler needs must be representable as `serde_json::Value`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct JobArgs {
    pub positional: Vec<Value>,
    pub keyword: Map<String, Value>,
}

impl JobArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument.
    pub fn with_arg(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Set a keyword argument.
    pub fn with_kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.keyword.insert(key.into(), value.into());
        self
    }

    pub fn kwarg(&self, key: &str) -> Option<&Value> {
        self.keyword.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keyword.is_empty()
    }
}

impl Display for JobArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            serde_json::json!({ "args": self.positional, "kwargs": self.keyword })
        )
    }
}

/// What actually travels through the queue: a job name plus arguments.
///
/// The worker resolves the name against its [`crate::registry::JobRegistry`]
/// to find the handler; no closures cross the process boundary.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobCall {
    pub job_name: String,
    pub args: JobArgs,
}

impl JobCall {
    pub fn new(job_name: impl Into<String>, args: JobArgs) -> Self {
        Self {
            job_name: job_name.into(),
            args,
        }
    }
}

/// Handle returned from enqueue operations.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobHandle {
    pub id: JobId,
    pub job_name: String,
    pub queue: String,
}

/// Result of one handler invocation.
pub type JobOutput = anyhow::Result<Value>;

/// Boxed future produced by a job handler.
pub type BoxedJobFuture = Pin<Box<dyn Future<Output = JobOutput> + Send>>;

/// Type-erased job handler stored in the registry.
pub type JobHandler = dyn Fn(JobArgs) -> BoxedJobFuture + Send + Sync;

/// A named, invokable unit of background work.
///
/// A `Job` pairs a stable name with an async handler. The name is what
/// gets serialized into the queue; the handler is what a worker (or an
/// inline [`Job::invoke`]) runs after resolving that name. Build one with
/// [`Job::new`] and register it on the [`JobRuntime`] so detached worker
/// processes can find it.
#[derive(Clone)]
pub struct Job {
    name: Arc<str>,
    handler: Arc<JobHandler>,
}

impl Job {
    /// Wrap an async function into a job with a stable name.
    pub fn new<F, Fut>(name: impl Into<Arc<str>>, handler: F) -> Self
    where
        F: Fn(JobArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = JobOutput> + Send + 'static,
    {
        Self {
            name: name.into(),
            handler: Arc::new(move |args| Box::pin(handler(args))),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn handler(&self) -> Arc<JobHandler> {
        Arc::clone(&self.handler)
    }

    /// Execute the handler inline, through the execution-context guard.
    ///
    /// If the ambient application context is already active the handler
    /// runs directly; otherwise a fresh context is bootstrapped for the
    /// duration of the call.
    pub async fn invoke(&self, runtime: &JobRuntime, args: JobArgs) -> JobOutput {
        run_guarded(&runtime.guard(), &self.name, self.handler(), args).await
    }

    /// Submit for immediate pickup on the runtime's default queue.
    pub async fn enqueue_now(
        &self,
        runtime: &JobRuntime,
        args: JobArgs,
    ) -> anyhow::Result<JobHandle> {
        runtime.client().enqueue(self.call(args)).await
    }

    /// Submit for execution no earlier than `now + delay`.
    ///
    /// A zero delay is equivalent to [`Job::enqueue_now`].
    pub async fn enqueue_after(
        &self,
        runtime: &JobRuntime,
        delay: chrono::Duration,
        args: JobArgs,
    ) -> anyhow::Result<JobHandle> {
        runtime.client().enqueue_in(delay, self.call(args)).await
    }

    /// Register a recurring enqueue with the given cron expression and
    /// fixed arguments.
    ///
    /// Each call adds an independent registration; scheduling the same
    /// job under two cron expressions yields two enqueue streams.
    pub async fn schedule(
        &self,
        runtime: &JobRuntime,
        cron_expr: &str,
        args: JobArgs,
    ) -> anyhow::Result<RegistrationId> {
        // Reject malformed expressions at registration time, not first tick.
        parse_cron(cron_expr)?;
        let registration = CronRegistration::new(
            cron_expr,
            runtime.config().default_queue.clone(),
            self.call(args),
        );
        tracing::info!(
            job = %self.name,
            cron = cron_expr,
            registration = %registration.id,
            "registering cron schedule"
        );
        runtime.schedules().register(registration).await
    }

    fn call(&self, args: JobArgs) -> JobCall {
        JobCall::new(self.name.as_ref(), args)
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job").field("name", &self.name).finish()
    }
}

/// Run a handler through the context guard, logging failures with the
/// job identity and arguments before propagating them.
///
/// Both the inline path ([`Job::invoke`]) and the worker go through
/// here, so a job never executes without the guard.
pub(crate) async fn run_guarded(
    guard: &ContextGuard,
    name: &str,
    handler: Arc<JobHandler>,
    args: JobArgs,
) -> JobOutput {
    let call_args = args.clone();
    let result = guard.run(move || handler(call_args)).await;
    if let Err(err) = &result {
        tracing::error!(job = name, args = %args, error = %err, "job execution failed");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_state_round_trips_through_str() {
        for state in [
            JobState::Queued,
            JobState::Started,
            JobState::Finished,
            JobState::Failed,
            JobState::Cancelled,
        ] {
            assert_eq!(state.as_str().parse::<JobState>().unwrap(), state);
        }
        assert!("sleeping".parse::<JobState>().is_err());
    }

    #[test]
    fn terminal_states() {
        assert!(!JobState::Queued.is_terminal());
        assert!(!JobState::Started.is_terminal());
        assert!(JobState::Finished.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Cancelled.is_terminal());
    }

    #[test]
    fn job_args_builder() {
        let args = JobArgs::new()
            .with_arg(7)
            .with_kwarg("user_id", 7)
            .with_kwarg("from_info", "test");

        assert_eq!(args.positional.len(), 1);
        assert_eq!(args.kwarg("user_id"), Some(&serde_json::json!(7)));
        assert!(args.kwarg("missing").is_none());
        assert!(!args.is_empty());
        assert!(JobArgs::new().is_empty());
    }

    #[test]
    fn job_args_serialize_round_trip() {
        let args = JobArgs::new().with_arg("a").with_kwarg("k", 1);
        let json = serde_json::to_string(&args).unwrap();
        let back: JobArgs = serde_json::from_str(&json).unwrap();
        assert_eq!(back.positional, args.positional);
        assert_eq!(back.keyword, args.keyword);
    }
}
