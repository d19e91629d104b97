//! Scheduler process integration tests: cron registrations firing Job
//! Instances, catch-up policies, and double-fire protection.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use drudge::{
    parse_cron, CatchUpPolicy, CronRegistration, JobArgs, JobCall, JobRuntime, JobState,
    SchedulerConfig, SchedulerProcess, ScheduleStore, WorkerConfig,
};
use drudge_testkit::{
    send_reminder_job, MemoryQueueBackend, MemoryScheduleStore, RecordingContextProvider,
};

struct Fixture {
    backend: MemoryQueueBackend,
    store: MemoryScheduleStore,
    runtime: JobRuntime,
}

fn fixture() -> Fixture {
    let backend = MemoryQueueBackend::new();
    let store = MemoryScheduleStore::new();
    let runtime = JobRuntime::builder()
        .with_queue_backend(Arc::new(backend.clone()))
        .with_schedule_store(Arc::new(store.clone()))
        .with_context_provider(Arc::new(RecordingContextProvider::new()))
        .register(send_reminder_job())
        .build()
        .expect("runtime should build");
    Fixture {
        backend,
        store,
        runtime,
    }
}

fn scheduler_with(fixture: &Fixture, catch_up: CatchUpPolicy) -> SchedulerProcess {
    SchedulerProcess::new(
        Arc::new(fixture.store.clone()),
        Arc::new(fixture.backend.clone()),
        SchedulerConfig {
            poll_interval_ms: 60_000,
            catch_up,
        },
    )
}

/// Next n ticks of `cron` strictly after now, per the same parser the
/// scheduler uses.
fn next_ticks(cron: &str, n: usize) -> Vec<DateTime<Utc>> {
    parse_cron(cron)
        .unwrap()
        .after(&Utc::now())
        .take(n)
        .collect()
}

#[tokio::test]
async fn registration_fires_exactly_one_instance_per_tick() {
    let fixture = fixture();
    let job = send_reminder_job();

    job.schedule(&fixture.runtime, "0 15 * * FRI", JobArgs::new())
        .await
        .unwrap();

    let scheduler = fixture.runtime.scheduler_process();
    let ticks = next_ticks("0 15 * * FRI", 2);

    // Polling some seconds past the tick fires it once.
    let fired = scheduler
        .poll_once(ticks[0] + chrono::Duration::seconds(30))
        .await
        .unwrap();
    assert_eq!(fired, 1);
    assert_eq!(fixture.runtime.client().queue_info().await.unwrap().length, 1);

    // Polling again in the same window fires nothing.
    let fired = scheduler
        .poll_once(ticks[0] + chrono::Duration::minutes(5))
        .await
        .unwrap();
    assert_eq!(fired, 0);

    // The following week's tick fires independently.
    let fired = scheduler
        .poll_once(ticks[1] + chrono::Duration::seconds(30))
        .await
        .unwrap();
    assert_eq!(fired, 1);
    assert_eq!(fixture.runtime.client().queue_info().await.unwrap().length, 2);
}

#[tokio::test]
async fn two_registrations_for_one_job_are_independent_streams() {
    let fixture = fixture();
    let job = send_reminder_job();

    let tuesday = job
        .schedule(&fixture.runtime, "0 15 * * TUE", JobArgs::new())
        .await
        .unwrap();
    let friday = job
        .schedule(&fixture.runtime, "0 15 * * FRI", JobArgs::new())
        .await
        .unwrap();
    assert_ne!(tuesday, friday);
    assert_eq!(fixture.store.len(), 2);

    // One week covers exactly one tick of each weekly registration.
    let scheduler = scheduler_with(&fixture, CatchUpPolicy::EveryMissedTick);
    let fired = scheduler
        .poll_once(Utc::now() + chrono::Duration::days(7))
        .await
        .unwrap();

    assert_eq!(fired, 2);
    assert_eq!(fixture.runtime.client().queue_info().await.unwrap().length, 2);

    let entries = fixture.store.entries().await.unwrap();
    assert!(entries.iter().all(|entry| entry.last_fired.is_some()));
}

#[tokio::test]
async fn latest_only_collapses_missed_ticks() {
    let fixture = fixture();
    let job = send_reminder_job();
    job.schedule(&fixture.runtime, "0 2 * * *", JobArgs::new())
        .await
        .unwrap();

    // Three daily ticks elapse while the scheduler was down.
    let wake = Utc::now() + chrono::Duration::days(3);
    let fired = scheduler_with(&fixture, CatchUpPolicy::LatestOnly)
        .poll_once(wake)
        .await
        .unwrap();

    assert_eq!(fired, 1);
}

#[tokio::test]
async fn every_missed_tick_replays_all() {
    let fixture = fixture();
    let job = send_reminder_job();
    job.schedule(&fixture.runtime, "0 2 * * *", JobArgs::new())
        .await
        .unwrap();

    let wake = Utc::now() + chrono::Duration::days(3);
    let fired = scheduler_with(&fixture, CatchUpPolicy::EveryMissedTick)
        .poll_once(wake)
        .await
        .unwrap();

    assert_eq!(fired, 3);
}

#[tokio::test]
async fn late_wakeup_never_double_fires_a_tick() {
    let fixture = fixture();
    let job = send_reminder_job();
    job.schedule(&fixture.runtime, "0 2 * * *", JobArgs::new())
        .await
        .unwrap();

    let scheduler = fixture.runtime.scheduler_process();
    let tick = next_ticks("0 2 * * *", 1)[0];

    // Woken well after the tick.
    let fired = scheduler
        .poll_once(tick + chrono::Duration::minutes(10))
        .await
        .unwrap();
    assert_eq!(fired, 1);

    // Woken again, later still, in the same cron window.
    let fired = scheduler
        .poll_once(tick + chrono::Duration::minutes(20))
        .await
        .unwrap();
    assert_eq!(fired, 0);
}

#[tokio::test]
async fn unparseable_stored_registration_is_skipped() {
    let fixture = fixture();

    // Bypass Job::schedule validation, as if the store held a
    // registration written by a different (buggy) producer.
    fixture
        .store
        .register(CronRegistration::new(
            "definitely not cron",
            "default",
            JobCall::new("send_reminder", JobArgs::new()),
        ))
        .await
        .unwrap();

    let fired = fixture
        .runtime
        .scheduler_process()
        .poll_once(Utc::now() + chrono::Duration::days(1))
        .await
        .unwrap();
    assert_eq!(fired, 0);
}

#[tokio::test]
async fn schedule_rejects_malformed_cron_at_registration() {
    let fixture = fixture();
    let job = send_reminder_job();

    let result = job
        .schedule(&fixture.runtime, "99 99 * * *", JobArgs::new())
        .await;
    assert!(result.is_err());
    assert!(fixture.store.is_empty());
}

#[tokio::test]
async fn scheduled_instance_executes_like_any_other_job() {
    let fixture = fixture();
    let job = send_reminder_job();
    job.schedule(
        &fixture.runtime,
        "0 15 * * FRI",
        JobArgs::new().with_kwarg("user_id", 7),
    )
    .await
    .unwrap();

    let tick = next_ticks("0 15 * * FRI", 1)[0];
    let fired = fixture
        .runtime
        .scheduler_process()
        .poll_once(tick + chrono::Duration::seconds(5))
        .await
        .unwrap();
    assert_eq!(fired, 1);

    let worker = fixture.runtime.worker(WorkerConfig::new("cron-worker"));
    assert!(worker.run_once().await.unwrap());

    let pending = fixture.runtime.client().queue_info().await.unwrap();
    assert_eq!(pending.length, 0);

    // The fired instance went queued -> started -> finished with the
    // registration's fixed arguments flowing through.
    let records = fixture.backend.jobs();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].state, JobState::Finished);
    assert_eq!(
        records[0].result,
        Some(serde_json::json!({ "status": "success", "user_id": 7 }))
    );
}
