use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;

use super::{AppendResult, EventStore, EventStoreError, NewEvent, RecordedEvent};

#[derive(Default)]
struct StoreState {
    /// Physically retained events, ascending by global position.
    log: Vec<RecordedEvent>,
    /// Last assigned version per stream. Survives compaction, so appends
    /// after a deletion keep the dense per-stream sequence.
    versions: HashMap<String, i64>,
    next_global_position: i64,
}

/// In-memory implementation used by tests and local tooling. Mirrors the
/// Postgres semantics: atomic batches, dense per-stream versions, one global
/// monotonic position sequence.
pub struct InMemoryEventStore {
    state: Mutex<StoreState>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StoreState {
                log: Vec::new(),
                versions: HashMap::new(),
                next_global_position: 1,
            }),
        }
    }

    /// Test hook: total number of physically retained events.
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(
        &self,
        stream_id: &str,
        expected_version: i64,
        events: Vec<NewEvent>,
    ) -> Result<AppendResult, EventStoreError> {
        let mut state = self.state.lock().unwrap();
        let current = state.versions.get(stream_id).copied().unwrap_or(0);
        if current != expected_version {
            return Err(EventStoreError::WrongVersion {
                stream_id: stream_id.to_string(),
                expected: expected_version,
                current,
            });
        }

        let mut global_positions = Vec::with_capacity(events.len());
        let mut version = current;
        let recorded_at = Utc::now();
        for event in events {
            version += 1;
            let global_position = state.next_global_position;
            state.next_global_position += 1;
            global_positions.push(global_position);
            state.log.push(RecordedEvent {
                global_position,
                stream_id: stream_id.to_string(),
                stream_version: version,
                event_type: event.event_type,
                payload: event.payload,
                metadata: event.metadata,
                recorded_at,
            });
        }
        state.versions.insert(stream_id.to_string(), version);

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
        let state = self.state.lock().unwrap();
        Ok(state
            .log
            .iter()
            .filter(|e| e.stream_id == stream_id && e.stream_version > from_version)
            .take(max)
            .cloned()
            .collect())
    }

    async fn read_all(
        &self,
        from_global_position: i64,
        max: usize,
    ) -> Result<Vec<RecordedEvent>, EventStoreError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .log
            .iter()
            .filter(|e| e.global_position > from_global_position)
            .take(max)
            .cloned()
            .collect())
    }

    async fn stream_version(&self, stream_id: &str) -> Result<i64, EventStoreError> {
        let state = self.state.lock().unwrap();
        Ok(state.versions.get(stream_id).copied().unwrap_or(0))
    }

    async fn delete_stream_events_before(
        &self,
        stream_id: &str,
        keep_from_version: i64,
    ) -> Result<u64, EventStoreError> {
        let mut state = self.state.lock().unwrap();
        let before = state.log.len();
        state
            .log
            .retain(|e| e.stream_id != stream_id || e.stream_version >= keep_from_version);
        Ok((before - state.log.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(event_type: &str) -> NewEvent {
        NewEvent {
            event_type: event_type.to_string(),
            payload: json!({ "type": event_type }),
            metadata: json!({}),
        }
    }

    #[tokio::test]
    async fn append_assigns_dense_versions_and_positions() {
        let store = InMemoryEventStore::new();

        let result = store
            .append("u1", 0, vec![event("A"), event("B")])
            .await
            .unwrap();
        assert_eq!(result.new_version, 2);
        assert_eq!(result.global_positions, vec![1, 2]);

        let result = store.append("u2", 0, vec![event("C")]).await.unwrap();
        assert_eq!(result.new_version, 1);
        assert_eq!(result.global_positions, vec![3]);

        let all = store.read_all(0, 100).await.unwrap();
        let positions: Vec<_> = all.iter().map(|e| e.global_position).collect();
        assert_eq!(positions, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn append_with_wrong_version_is_rejected() {
        let store = InMemoryEventStore::new();
        store.append("u1", 0, vec![event("A")]).await.unwrap();

        let err = store.append("u1", 0, vec![event("B")]).await.unwrap_err();
        match err {
            EventStoreError::WrongVersion {
                expected, current, ..
            } => {
                assert_eq!(expected, 0);
                assert_eq!(current, 1);
            }
            other => panic!("expected WrongVersion, got {:?}", other),
        }
        // Nothing was appended.
        assert_eq!(store.stream_version("u1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn read_stream_pages_in_version_order() {
        let store = InMemoryEventStore::new();
        store
            .append("u1", 0, vec![event("A"), event("B"), event("C")])
            .await
            .unwrap();

        let page = store.read_stream("u1", 1, 10).await.unwrap();
        let versions: Vec<_> = page.iter().map(|e| e.stream_version).collect();
        assert_eq!(versions, vec![2, 3]);
    }

    #[test]
    fn stream_version_of_unknown_stream_is_zero() {
        let store = InMemoryEventStore::new();
        assert_eq!(
            tokio_test::block_on(store.stream_version("nobody")).unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn version_survives_compaction() {
        let store = InMemoryEventStore::new();
        store
            .append("u1", 0, vec![event("A"), event("B"), event("C")])
            .await
            .unwrap();

        let removed = store.delete_stream_events_before("u1", 3).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.stream_version("u1").await.unwrap(), 3);

        // Appends continue the dense sequence.
        let result = store.append("u1", 3, vec![event("D")]).await.unwrap();
        assert_eq!(result.new_version, 4);

        let stream = store.read_stream("u1", 0, 10).await.unwrap();
        let versions: Vec<_> = stream.iter().map(|e| e.stream_version).collect();
        assert_eq!(versions, vec![3, 4]);
    }
}
