use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::json;

use drudge::{Job, JobArgs};

/// Notification-shaped probe job: succeeds and echoes the `user_id`
/// keyword argument in its result.
pub fn send_reminder_job() -> Job {
    Job::new("send_reminder", |args: JobArgs| async move {
        let user_id = args
            .kwarg("user_id")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        Ok(json!({ "status": "success", "user_id": user_id }))
    })
}

/// Probe job that counts its executions through the shared counter.
pub fn counting_job(name: &'static str, counter: Arc<AtomicUsize>) -> Job {
    Job::new(name, move |_args: JobArgs| {
        let counter = Arc::clone(&counter);
        async move {
            let count = counter.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(json!({ "count": count }))
        }
    })
}

/// Probe job that always fails with the given message.
pub fn failing_job(name: &'static str, message: &'static str) -> Job {
    Job::new(name, move |_args: JobArgs| async move {
        anyhow::bail!("{message}")
    })
}
