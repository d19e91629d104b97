use std::fmt::Display;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::job::JobCall;

/// Unique identifier of one cron registration.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct RegistrationId(pub Uuid);

impl RegistrationId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RegistrationId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for RegistrationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One recurring enqueue: a cron expression, a target queue, and the
/// call to submit at each matching tick.
///
/// Registrations never terminate on their own; they persist until the
/// scheduler process stops. No removal path is exposed here.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CronRegistration {
    pub id: RegistrationId,
    pub cron: String,
    pub queue: String,
    pub call: JobCall,
    pub created_at: DateTime<Utc>,
}

impl CronRegistration {
    pub fn new(cron: impl Into<String>, queue: impl Into<String>, call: JobCall) -> Self {
        Self {
            id: RegistrationId::new(),
            cron: cron.into(),
            queue: queue.into(),
            call,
            created_at: Utc::now(),
        }
    }
}

/// A registration plus the last tick it fired for.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub registration: CronRegistration,
    /// The logical tick time most recently fired, not the wall-clock
    /// moment the scheduler got around to it. Firing is keyed on this
    /// so a late wakeup never fires twice for the same tick.
    pub last_fired: Option<DateTime<Utc>>,
}

impl ScheduleEntry {
    pub fn new(registration: CronRegistration) -> Self {
        Self {
            registration,
            last_fired: None,
        }
    }
}

/// Trait for the scheduling backend that stores cron registrations.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// Store a registration. Multiple registrations for the same job
    /// are additive, each with its own id.
    async fn register(&self, registration: CronRegistration) -> anyhow::Result<RegistrationId>;

    /// All registrations with their last-fired ticks.
    async fn entries(&self) -> anyhow::Result<Vec<ScheduleEntry>>;

    /// Record that a registration fired for the given tick.
    async fn mark_fired(&self, id: RegistrationId, tick: DateTime<Utc>) -> anyhow::Result<()>;
}

/// What to do with ticks that were missed while the scheduler process
/// was down. This is an explicit configuration choice; neither option
/// is silently assumed.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatchUpPolicy {
    /// Fire once for the most recent missed tick and skip the rest.
    #[default]
    LatestOnly,
    /// Fire once for every missed tick, in order.
    EveryMissedTick,
}

/// Configuration for the scheduler process.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Cadence at which due registrations are polled, in milliseconds.
    pub poll_interval_ms: u64,
    pub catch_up: CatchUpPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 60_000,
            catch_up: CatchUpPolicy::default(),
        }
    }
}

/// Parse a cron expression, accepting the classic 5-field form.
///
/// The `cron` crate wants a seconds field; 5-field expressions are
/// normalized by pinning seconds to zero. 6- and 7-field expressions
/// pass through unchanged.
pub fn parse_cron(expr: &str) -> anyhow::Result<Schedule> {
    let trimmed = expr.trim();
    let fields = trimmed.split_whitespace().count();
    let normalized = if fields == 5 {
        format!("0 {trimmed}")
    } else {
        trimmed.to_string()
    };
    Schedule::from_str(&normalized)
        .map_err(|err| anyhow::anyhow!("invalid cron expression `{expr}`: {err}"))
}

/// Ticks of `schedule` that are due: strictly after `after`, at or
/// before `now`, filtered by the catch-up policy.
pub fn due_ticks(
    schedule: &Schedule,
    after: DateTime<Utc>,
    now: DateTime<Utc>,
    policy: CatchUpPolicy,
) -> Vec<DateTime<Utc>> {
    let mut ticks: Vec<DateTime<Utc>> =
        schedule.after(&after).take_while(|tick| *tick <= now).collect();
    if policy == CatchUpPolicy::LatestOnly && ticks.len() > 1 {
        ticks = ticks.split_off(ticks.len() - 1);
    }
    ticks
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn parses_five_field_expressions() {
        assert!(parse_cron("0 15 * * 5").is_ok());
        assert!(parse_cron("*/5 * * * *").is_ok());
    }

    #[test]
    fn parses_expressions_with_seconds() {
        assert!(parse_cron("0 0 2 * * *").is_ok());
    }

    #[test]
    fn rejects_malformed_expressions() {
        assert!(parse_cron("not a cron").is_err());
        assert!(parse_cron("61 * * * *").is_err());
        assert!(parse_cron("").is_err());
    }

    #[test]
    fn no_ticks_before_first_match() {
        let schedule = parse_cron("0 2 * * *").unwrap();
        let after = utc(2026, 1, 1, 0, 0, 0);
        let now = utc(2026, 1, 1, 1, 0, 0);

        assert!(due_ticks(&schedule, after, now, CatchUpPolicy::EveryMissedTick).is_empty());
    }

    #[test]
    fn every_missed_tick_returns_all_in_order() {
        let schedule = parse_cron("0 2 * * *").unwrap();
        let after = utc(2026, 1, 1, 0, 0, 0);
        let now = utc(2026, 1, 3, 12, 0, 0);

        let ticks = due_ticks(&schedule, after, now, CatchUpPolicy::EveryMissedTick);
        assert_eq!(
            ticks,
            vec![
                utc(2026, 1, 1, 2, 0, 0),
                utc(2026, 1, 2, 2, 0, 0),
                utc(2026, 1, 3, 2, 0, 0),
            ]
        );
    }

    #[test]
    fn latest_only_collapses_missed_ticks() {
        let schedule = parse_cron("0 2 * * *").unwrap();
        let after = utc(2026, 1, 1, 0, 0, 0);
        let now = utc(2026, 1, 3, 12, 0, 0);

        let ticks = due_ticks(&schedule, after, now, CatchUpPolicy::LatestOnly);
        assert_eq!(ticks, vec![utc(2026, 1, 3, 2, 0, 0)]);
    }

    #[test]
    fn fired_tick_is_never_returned_again() {
        let schedule = parse_cron("0 2 * * *").unwrap();
        let last_fired = utc(2026, 1, 3, 2, 0, 0);
        let now = utc(2026, 1, 3, 12, 0, 0);

        assert!(due_ticks(&schedule, last_fired, now, CatchUpPolicy::EveryMissedTick).is_empty());
    }

    #[test]
    fn tick_exactly_at_now_is_due() {
        let schedule = parse_cron("0 2 * * *").unwrap();
        let after = utc(2026, 1, 2, 12, 0, 0);
        let now = utc(2026, 1, 3, 2, 0, 0);

        let ticks = due_ticks(&schedule, after, now, CatchUpPolicy::LatestOnly);
        assert_eq!(ticks, vec![now]);
    }
}
