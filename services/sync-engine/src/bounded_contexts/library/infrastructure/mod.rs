pub mod event_store;
pub mod projections;
pub mod rate_limiter;
pub mod snapshot;

pub use event_store::{EventStore, EventStoreError, InMemoryEventStore, PostgresEventStore};
pub use projections::{Projection, ProjectionRunner};
pub use rate_limiter::{PlayRateLimiter, RateLimitDecision};
pub use snapshot::{SnapshotWorker, SnapshotWorkerConfig};
