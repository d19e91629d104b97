use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use drudge::{CronRegistration, RegistrationId, ScheduleEntry, ScheduleStore};

/// In-memory store of cron registrations.
#[derive(Clone, Default)]
pub struct MemoryScheduleStore {
    entries: Arc<Mutex<Vec<ScheduleEntry>>>,
}

impl MemoryScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test probe: number of registrations held.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl ScheduleStore for MemoryScheduleStore {
    async fn register(&self, registration: CronRegistration) -> anyhow::Result<RegistrationId> {
        let id = registration.id;
        self.entries.lock().push(ScheduleEntry::new(registration));
        Ok(id)
    }

    async fn entries(&self) -> anyhow::Result<Vec<ScheduleEntry>> {
        Ok(self.entries.lock().clone())
    }

    async fn mark_fired(&self, id: RegistrationId, tick: DateTime<Utc>) -> anyhow::Result<()> {
        let mut entries = self.entries.lock();
        let Some(entry) = entries
            .iter_mut()
            .find(|entry| entry.registration.id == id)
        else {
            anyhow::bail!("registration {id} not found");
        };
        // Monotonic watermark, even if ticks arrive out of order.
        entry.last_fired = Some(match entry.last_fired {
            Some(previous) => previous.max(tick),
            None => tick,
        });
        Ok(())
    }
}

impl std::fmt::Debug for MemoryScheduleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryScheduleStore")
            .field("registrations", &self.len())
            .finish()
    }
}
