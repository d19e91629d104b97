//! In-memory backends and probe jobs for testing drudge-based services.
//!
//! [`MemoryQueueBackend`] and [`MemoryScheduleStore`] implement the
//! full Job Instance and registration state machines without external
//! infrastructure, and [`RecordingContextProvider`] lets tests assert
//! on context bootstrap behavior. The probe jobs in [`job`] cover the
//! common success/failure/counting shapes.

pub mod context;
pub mod job;
pub mod queue;
pub mod schedule;

pub use context::RecordingContextProvider;
pub use job::{counting_job, failing_job, send_reminder_job};
pub use queue::MemoryQueueBackend;
pub use schedule::MemoryScheduleStore;
