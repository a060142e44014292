use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;

use crate::bounded_contexts::library::domain::events::LibraryEvent;
use crate::shared::domain::events::DomainEvent;

/// An event about to be appended. Stream coordinates and the recording
/// timestamp are assigned by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEvent {
    pub event_type: String,
    pub payload: serde_json::Value,
    pub metadata: serde_json::Value,
}

impl NewEvent {
    pub fn from_domain(
        event: &dyn DomainEvent,
        metadata: serde_json::Value,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            event_type: event.event_type().to_string(),
            payload: event.event_data()?,
            metadata,
        })
    }
}

/// An event read back from the log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedEvent {
    pub global_position: i64,
    pub stream_id: String,
    pub stream_version: i64,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub metadata: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

impl RecordedEvent {
    pub fn decode(&self) -> Result<LibraryEvent, serde_json::Error> {
        LibraryEvent::from_payload(&self.payload)
    }
}

#[derive(Debug, Clone)]
pub struct AppendResult {
    pub new_version: i64,
    pub global_positions: Vec<i64>,
}

impl AppendResult {
    pub fn last_global_position(&self) -> Option<i64> {
        self.global_positions.last().copied()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EventStoreError {
    #[error("wrong expected version for stream {stream_id}: expected {expected}, current {current}")]
    WrongVersion {
        stream_id: String,
        expected: i64,
        current: i64,
    },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("database error: {0}")]
    Database(String),
}

impl From<serde_json::Error> for EventStoreError {
    fn from(err: serde_json::Error) -> Self {
        EventStoreError::Serialization(err.to_string())
    }
}

impl From<sqlx::Error> for EventStoreError {
    fn from(err: sqlx::Error) -> Self {
        EventStoreError::Database(err.to_string())
    }
}

/// Append-only, per-stream, monotonically-ordered event log with a global
/// commit position. Every operation either fully succeeds or leaves the
/// store unchanged.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append the whole batch atomically. `expected_version = 0` means the
    /// stream must not exist yet (or must currently be empty).
    async fn append(
        &self,
        stream_id: &str,
        expected_version: i64,
        events: Vec<NewEvent>,
    ) -> Result<AppendResult, EventStoreError>;

    /// Events of one stream in ascending `stream_version` order, starting
    /// after `from_version`.
    async fn read_stream(
        &self,
        stream_id: &str,
        from_version: i64,
        max: usize,
    ) -> Result<Vec<RecordedEvent>, EventStoreError>;

    /// Events across all streams in ascending `global_position` order,
    /// starting after `from_global_position`.
    async fn read_all(
        &self,
        from_global_position: i64,
        max: usize,
    ) -> Result<Vec<RecordedEvent>, EventStoreError>;

    /// Current version of a stream (0 when it has no events).
    async fn stream_version(&self, stream_id: &str) -> Result<i64, EventStoreError>;

    /// Physically remove events below `keep_from_version`. Only the snapshot
    /// worker calls this, after a checkpoint at or above that version is
    /// durable. Returns the number of removed events.
    async fn delete_stream_events_before(
        &self,
        stream_id: &str,
        keep_from_version: i64,
    ) -> Result<u64, EventStoreError>;
}
