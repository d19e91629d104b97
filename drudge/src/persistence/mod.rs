mod postgres;

pub use postgres::{connect, ensure_schema, PostgresQueueBackend, PostgresScheduleStore};
