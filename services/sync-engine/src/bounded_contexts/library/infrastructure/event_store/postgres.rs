use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Row};

use super::{AppendResult, EventStore, EventStoreError, NewEvent, RecordedEvent};

#[derive(FromRow)]
struct EventRow {
    global_position: i64,
    stream_id: String,
    stream_version: i64,
    event_type: String,
    payload: serde_json::Value,
    metadata: serde_json::Value,
    recorded_at: DateTime<Utc>,
}

impl From<EventRow> for RecordedEvent {
    fn from(row: EventRow) -> Self {
        RecordedEvent {
            global_position: row.global_position,
            stream_id: row.stream_id,
            stream_version: row.stream_version,
            event_type: row.event_type,
            payload: row.payload,
            metadata: row.metadata,
            recorded_at: row.recorded_at,
        }
    }
}

const SELECT_COLUMNS: &str =
    "global_position, stream_id, stream_version, type AS event_type, payload, metadata, recorded_at";

/// Event store backed by a single `events` table. Appends run in one
/// transaction holding a per-stream advisory lock, so the version check and
/// the inserts are atomic with respect to concurrent writers of the same
/// stream; global positions come from the table's BIGSERIAL sequence.
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    async fn append(
        &self,
        stream_id: &str,
        expected_version: i64,
        events: Vec<NewEvent>,
    ) -> Result<AppendResult, EventStoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1)::bigint)")
            .bind(stream_id)
            .execute(&mut *tx)
            .await?;

        let current: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(stream_version), 0) FROM events WHERE stream_id = $1",
        )
        .bind(stream_id)
        .fetch_one(&mut *tx)
        .await?;

        if current != expected_version {
            // Rolls back on drop; the store is left unchanged.
            return Err(EventStoreError::WrongVersion {
                stream_id: stream_id.to_string(),
                expected: expected_version,
                current,
            });
        }

        let recorded_at = Utc::now();
        let mut global_positions = Vec::with_capacity(events.len());
        let mut version = current;
        for event in events {
            version += 1;
            let row = sqlx::query(
                r#"INSERT INTO events (stream_id, stream_version, type, payload, metadata, recorded_at)
                   VALUES ($1, $2, $3, $4, $5, $6)
                   RETURNING global_position"#,
            )
            .bind(stream_id)
            .bind(version)
            .bind(&event.event_type)
            .bind(&event.payload)
            .bind(&event.metadata)
            .bind(recorded_at)
            .fetch_one(&mut *tx)
            .await?;
            global_positions.push(row.try_get::<i64, _>("global_position")?);
        }

        tx.commit().await?;

        Ok(AppendResult {
            new_version: version,
            global_positions,
        })
    }

    async fn read_stream(
        &self,
        stream_id: &str,
        from_version: i64,
        max: usize,
    ) -> Result<Vec<RecordedEvent>, EventStoreError> {
        let rows: Vec<EventRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM events \
             WHERE stream_id = $1 AND stream_version > $2 \
             ORDER BY stream_version ASC LIMIT $3"
        ))
        .bind(stream_id)
        .bind(from_version)
        .bind(max as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(RecordedEvent::from).collect())
    }

    async fn read_all(
        &self,
        from_global_position: i64,
        max: usize,
    ) -> Result<Vec<RecordedEvent>, EventStoreError> {
        let rows: Vec<EventRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM events \
             WHERE global_position > $1 \
             ORDER BY global_position ASC LIMIT $2"
        ))
        .bind(from_global_position)
        .bind(max as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(RecordedEvent::from).collect())
    }

    async fn stream_version(&self, stream_id: &str) -> Result<i64, EventStoreError> {
        let version: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(stream_version), 0) FROM events WHERE stream_id = $1",
        )
        .bind(stream_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(version)
    }

    async fn delete_stream_events_before(
        &self,
        stream_id: &str,
        keep_from_version: i64,
    ) -> Result<u64, EventStoreError> {
        let result = sqlx::query(
            "DELETE FROM events WHERE stream_id = $1 AND stream_version < $2",
        )
        .bind(stream_id)
        .bind(keep_from_version)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
