use std::collections::HashMap;
use std::sync::Arc;

use crate::job::{Job, JobHandler};

/// Error raised when building the registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Two jobs were registered under the same name. Names are the only
    /// identity that crosses the process boundary, so they must be unique.
    #[error("job `{0}` is already registered")]
    Duplicate(String),
}

/// Explicit name-to-handler lookup table consulted by workers.
///
/// The queue transports a job name plus arguments, never a closure. A
/// worker process must therefore hold a registry containing the same
/// jobs the enqueuing process was built with; a name that cannot be
/// resolved is recorded as an execution failure.
#[derive(Default)]
pub struct JobRegistry {
    handlers: HashMap<String, Arc<JobHandler>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job under its stable name.
    pub fn register(&mut self, job: &Job) -> Result<(), RegistryError> {
        let name = job.name().to_string();
        if self.handlers.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        self.handlers.insert(name, job.handler());
        Ok(())
    }

    /// Resolve a job name to its handler.
    pub fn resolve(&self, name: &str) -> Option<Arc<JobHandler>> {
        self.handlers.get(name).map(Arc::clone)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRegistry")
            .field("jobs", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobArgs;

    fn noop_job(name: &'static str) -> Job {
        Job::new(name, |_args: JobArgs| async {
            Ok(serde_json::Value::Null)
        })
    }

    #[test]
    fn register_and_resolve() {
        let mut registry = JobRegistry::new();
        registry.register(&noop_job("send_reminder")).unwrap();

        assert!(registry.resolve("send_reminder").is_some());
        assert!(registry.resolve("unknown").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let mut registry = JobRegistry::new();
        registry.register(&noop_job("send_reminder")).unwrap();

        let err = registry.register(&noop_job("send_reminder")).unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate(name) if name == "send_reminder"));
    }

    #[test]
    fn names_are_sorted() {
        let mut registry = JobRegistry::new();
        registry.register(&noop_job("b_job")).unwrap();
        registry.register(&noop_job("a_job")).unwrap();

        assert_eq!(registry.names(), vec!["a_job", "b_job"]);
    }
}
