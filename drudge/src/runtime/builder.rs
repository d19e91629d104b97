use std::fmt;
use std::sync::Arc;

use crate::config::RuntimeConfig;
use crate::context::ContextProvider;
use crate::job::Job;
use crate::queue::QueueBackend;
use crate::registry::JobRegistry;
use crate::schedule::ScheduleStore;

use super::JobRuntime;

/// Builder for constructing a [`JobRuntime`] with explicit dependencies.
///
/// Each dependency is configured via a `with_*` method and validated at
/// [`JobRuntimeBuilder::build`]; jobs registered here form the lookup
/// table workers consult.
///
/// # Example
///
/// ```ignore
/// let runtime = JobRuntime::builder()
///     .with_config(RuntimeConfig::from_env())
///     .with_queue_backend(backend)
///     .with_schedule_store(schedules)
///     .with_context_provider(context)
///     .register(send_reminder_job)
///     .build()?;
/// ```
pub struct JobRuntimeBuilder {
    config: Option<RuntimeConfig>,
    backend: Option<Arc<dyn QueueBackend>>,
    schedules: Option<Arc<dyn ScheduleStore>>,
    context: Option<Arc<dyn ContextProvider>>,
    jobs: Vec<Job>,
}

impl JobRuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            backend: None,
            schedules: None,
            context: None,
            jobs: Vec::new(),
        }
    }

    /// Set the runtime configuration. Defaults to
    /// [`RuntimeConfig::default`] when omitted.
    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the durable queue backend.
    pub fn with_queue_backend(mut self, backend: Arc<dyn QueueBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Set the cron schedule store.
    pub fn with_schedule_store(mut self, schedules: Arc<dyn ScheduleStore>) -> Self {
        self.schedules = Some(schedules);
        self
    }

    /// Set the application context provider.
    pub fn with_context_provider(mut self, context: Arc<dyn ContextProvider>) -> Self {
        self.context = Some(context);
        self
    }

    /// Add a job to the runtime's registry.
    pub fn register(mut self, job: Job) -> Self {
        self.jobs.push(job);
        self
    }

    /// Build the runtime with all configured dependencies.
    ///
    /// # Errors
    ///
    /// Returns an error if a required dependency is missing or two jobs
    /// share a name.
    pub fn build(self) -> anyhow::Result<JobRuntime> {
        let config = self.config.unwrap_or_default();
        let backend = self
            .backend
            .ok_or_else(|| anyhow::anyhow!("queue backend dependency missing"))?;
        let schedules = self
            .schedules
            .ok_or_else(|| anyhow::anyhow!("schedule store dependency missing"))?;
        let context = self
            .context
            .ok_or_else(|| anyhow::anyhow!("context provider dependency missing"))?;

        let mut registry = JobRegistry::new();
        for job in &self.jobs {
            registry.register(job)?;
        }

        Ok(JobRuntime::new(
            config,
            backend,
            schedules,
            context,
            Arc::new(registry),
        ))
    }
}

impl Default for JobRuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for JobRuntimeBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRuntimeBuilder")
            .field("config_set", &self.config.is_some())
            .field("backend_set", &self.backend.is_some())
            .field("schedules_set", &self.schedules.is_some())
            .field("context_set", &self.context.is_some())
            .field("jobs", &self.jobs.len())
            .finish()
    }
}
