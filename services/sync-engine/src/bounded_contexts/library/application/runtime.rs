use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::bounded_contexts::library::application::commands::{CommandEnvelope, LibraryCommand};
use crate::bounded_contexts::library::domain::aggregates::UserLibrary;
use crate::bounded_contexts::library::domain::errors::LibraryError;
use crate::bounded_contexts::library::domain::events::LibraryEvent;
use crate::bounded_contexts::library::domain::value_objects::UserId;
use crate::bounded_contexts::library::infrastructure::event_store::{
    EventStore, EventStoreError, NewEvent,
};

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Number of stripes in the `user_id → slot` map.
    pub shard_count: usize,
    /// Optimistic-concurrency retries before surfacing `version_conflict`.
    pub max_retries: u32,
    /// Cached aggregates idle longer than this are evicted.
    pub idle_ttl: Duration,
    /// Page size when replaying a stream.
    pub replay_batch: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            shard_count: 16,
            max_retries: 5,
            idle_ttl: Duration::from_secs(300),
            replay_batch: 512,
        }
    }
}

#[derive(Debug)]
pub enum ExecuteError {
    /// Caller's fault; never retried.
    Validation(LibraryError),
    /// Optimistic retries exhausted; retryable by the caller.
    VersionConflict,
    /// The command was cancelled before its events were appended.
    Cancelled,
    /// Stream quarantined after a fatal replay/apply failure.
    Poisoned,
    /// Transient infrastructure failure.
    Store(EventStoreError),
}

impl From<LibraryError> for ExecuteError {
    fn from(err: LibraryError) -> Self {
        ExecuteError::Validation(err)
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub stream_version: i64,
    pub global_positions: Vec<i64>,
    pub event_types: Vec<String>,
}

struct SlotState {
    library: Option<UserLibrary>,
    poisoned: bool,
    last_used: Instant,
}

struct StreamSlot {
    state: tokio::sync::Mutex<SlotState>,
}

/// Per-user aggregate runtime. Commands for one user are serialized through
/// the slot mutex; different users run in parallel across shards. Cached
/// state is rebuilt on demand by replay and dropped by the eviction loop.
pub struct AggregateRuntime {
    store: Arc<dyn EventStore>,
    shards: Vec<Mutex<HashMap<String, Arc<StreamSlot>>>>,
    config: RuntimeConfig,
}

impl AggregateRuntime {
    pub fn new(store: Arc<dyn EventStore>, config: RuntimeConfig) -> Self {
        let shard_count = config.shard_count.max(1);
        let shards = (0..shard_count)
            .map(|_| Mutex::new(HashMap::new()))
            .collect();
        Self {
            store,
            shards,
            config,
        }
    }

    pub fn store(&self) -> Arc<dyn EventStore> {
        Arc::clone(&self.store)
    }

    fn shard_for(&self, user_id: &str) -> &Mutex<HashMap<String, Arc<StreamSlot>>> {
        let mut hasher = DefaultHasher::new();
        user_id.hash(&mut hasher);
        let index = (hasher.finish() as usize) % self.shards.len();
        &self.shards[index]
    }

    fn slot(&self, user_id: &str) -> Arc<StreamSlot> {
        let mut shard = self.shard_for(user_id).lock().unwrap();
        shard
            .entry(user_id.to_string())
            .or_insert_with(|| {
                Arc::new(StreamSlot {
                    state: tokio::sync::Mutex::new(SlotState {
                        library: None,
                        poisoned: false,
                        last_used: Instant::now(),
                    }),
                })
            })
            .clone()
    }

    /// Serialized command execution: load (replay) → validate → append with
    /// `expected_version` → apply to cache. On a version conflict the cache
    /// is discarded and the handler re-runs, bounded by `max_retries`.
    pub async fn execute(
        &self,
        envelope: &CommandEnvelope,
        cancel: &CancellationToken,
    ) -> Result<ExecutionOutcome, ExecuteError> {
        let user_id = envelope.user_id.value().to_string();
        let slot = self.slot(&user_id);
        let mut state = slot.state.lock().await;
        state.last_used = Instant::now();

        if state.poisoned {
            return Err(ExecuteError::Poisoned);
        }

        let metadata = envelope.metadata();
        let mut attempt = 0u32;
        loop {
            if state.library.is_none() {
                match self.replay(&envelope.user_id).await {
                    Ok(library) => state.library = Some(library),
                    Err(ReplayError::Corrupted { version, detail }) => {
                        state.poisoned = true;
                        error!(
                            user_id = %envelope.user_id,
                            stream_version = version,
                            %detail,
                            "corrupted event payload during replay; quarantining stream"
                        );
                        return Err(ExecuteError::Poisoned);
                    }
                    Err(ReplayError::Store(err)) => return Err(ExecuteError::Store(err)),
                }
            }
            let library = state.library.as_mut().unwrap();

            let events = handle_command(library, &envelope.command)?;
            if events.is_empty() {
                let stream_version = library.stream_version();
                state.last_used = Instant::now();
                return Ok(ExecutionOutcome {
                    stream_version,
                    global_positions: Vec::new(),
                    event_types: Vec::new(),
                });
            }

            // Cancellation is honored up to the append; the append itself is
            // atomic and never abandoned half-way.
            if cancel.is_cancelled() {
                return Err(ExecuteError::Cancelled);
            }

            let new_events = events
                .iter()
                .map(|event| NewEvent::from_domain(event, metadata.clone()))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|err| ExecuteError::Store(EventStoreError::from(err)))?;

            let expected_version = library.stream_version();
            match self
                .store
                .append(&user_id, expected_version, new_events)
                .await
            {
                Ok(result) => {
                    for event in &events {
                        library.apply_new(event);
                    }
                    debug_assert_eq!(library.stream_version(), result.new_version);
                    state.last_used = Instant::now();
                    return Ok(ExecutionOutcome {
                        stream_version: result.new_version,
                        global_positions: result.global_positions,
                        event_types: events.iter().map(|e| e.event_type().to_string()).collect(),
                    });
                }
                Err(EventStoreError::WrongVersion { current, .. }) => {
                    attempt += 1;
                    if attempt > self.config.max_retries {
                        warn!(
                            user_id = %envelope.user_id,
                            attempts = attempt,
                            "optimistic concurrency retries exhausted"
                        );
                        return Err(ExecuteError::VersionConflict);
                    }
                    warn!(
                        user_id = %envelope.user_id,
                        expected = expected_version,
                        current,
                        attempt,
                        "stale aggregate version; reloading and retrying"
                    );
                    state.library = None;
                }
                Err(err) => return Err(ExecuteError::Store(err)),
            }
        }
    }

    async fn replay(&self, user_id: &UserId) -> Result<UserLibrary, ReplayError> {
        let mut library = UserLibrary::new(user_id.clone());
        let mut from_version = 0i64;
        loop {
            let page = self
                .store
                .read_stream(user_id.value(), from_version, self.config.replay_batch)
                .await
                .map_err(ReplayError::Store)?;
            if page.is_empty() {
                break;
            }
            for recorded in &page {
                let event = recorded.decode().map_err(|err| ReplayError::Corrupted {
                    version: recorded.stream_version,
                    detail: err.to_string(),
                })?;
                library.apply_recorded(recorded.stream_version, &event);
                from_version = recorded.stream_version;
            }
        }
        // The stream may have been compacted down to nothing but a version
        // counter; pick it up so appends stay dense.
        let stored_version = self
            .store
            .stream_version(user_id.value())
            .await
            .map_err(ReplayError::Store)?;
        library.fast_forward_version(stored_version);
        Ok(library)
    }

    /// Drop cached aggregates idle past the TTL. Slots currently executing
    /// (locked or shared) and quarantined slots are left alone.
    pub fn evict_idle(&self) {
        for shard in &self.shards {
            let mut map = shard.lock().unwrap();
            map.retain(|_, slot| {
                if Arc::strong_count(slot) > 1 {
                    return true;
                }
                match slot.state.try_lock() {
                    Ok(state) => {
                        state.poisoned || state.last_used.elapsed() < self.config.idle_ttl
                    }
                    Err(_) => true,
                }
            });
        }
    }

    /// Background loop around `evict_idle`, stopped by the shutdown token.
    pub async fn run_eviction_loop(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.evict_idle(),
            }
        }
    }

    /// Number of cached aggregates, for tests and introspection.
    pub fn cached_aggregates(&self) -> usize {
        self.shards.iter().map(|s| s.lock().unwrap().len()).sum()
    }
}

enum ReplayError {
    Corrupted { version: i64, detail: String },
    Store(EventStoreError),
}

/// Pure per-type handler table: `(state, command) → events | error`.
fn handle_command(
    library: &UserLibrary,
    command: &LibraryCommand,
) -> Result<Vec<LibraryEvent>, LibraryError> {
    let now = chrono::Utc::now();
    match command {
        LibraryCommand::Subscribe { feed } => library.subscribe(feed.clone(), now),
        LibraryCommand::Unsubscribe { feed } => library.unsubscribe(feed.clone(), now),
        LibraryCommand::RecordPlay {
            feed,
            item,
            position,
            played,
            timestamp,
        } => library.record_play(
            feed.clone(),
            item.clone(),
            *position,
            *played,
            timestamp.unwrap_or(now),
        ),
        LibraryCommand::UpdatePosition {
            feed,
            item,
            position,
            timestamp,
        } => library.update_position(feed.clone(), item.clone(), *position, timestamp.unwrap_or(now)),
        LibraryCommand::SaveEpisode {
            playlist_id,
            feed,
            item,
            item_title,
            feed_title,
        } => library.save_episode(
            *playlist_id,
            feed.clone(),
            item.clone(),
            item_title.clone(),
            feed_title.clone(),
        ),
        LibraryCommand::UnsaveEpisode {
            playlist_id,
            feed,
            item,
        } => library.unsave_episode(*playlist_id, feed.clone(), item.clone()),
        LibraryCommand::ShareEpisode { feed, item } => {
            library.share_episode(feed.clone(), item.clone())
        }
        LibraryCommand::ChangePrivacy {
            privacy,
            feed,
            item,
        } => library.change_privacy(*privacy, feed.clone(), item.clone()),
        LibraryCommand::RemoveEvents { feed, item } => {
            library.remove_events(feed.clone(), item.clone())
        }
        LibraryCommand::CreatePlaylist {
            playlist_id,
            name,
            description,
            is_public,
        } => library.create_playlist(*playlist_id, name.clone(), description.clone(), *is_public),
        LibraryCommand::UpdatePlaylist {
            playlist_id,
            name,
            description,
        } => library.update_playlist(*playlist_id, name.clone(), description.clone()),
        LibraryCommand::DeletePlaylist { playlist_id } => library.delete_playlist(*playlist_id),
        LibraryCommand::ReorderPlaylist {
            playlist_id,
            feed,
            item,
            new_position,
        } => library.reorder_playlist(*playlist_id, feed.clone(), item.clone(), *new_position),
        LibraryCommand::ChangePlaylistVisibility {
            playlist_id,
            is_public,
        } => library.change_playlist_visibility(*playlist_id, *is_public),
        LibraryCommand::CreateCollection {
            collection_id,
            title,
            description,
            color,
            is_default,
            is_public,
        } => library.create_collection(
            *collection_id,
            title.clone(),
            description.clone(),
            color.clone(),
            *is_default,
            *is_public,
        ),
        LibraryCommand::UpdateCollection {
            collection_id,
            title,
            description,
            color,
        } => library.update_collection(
            *collection_id,
            title.clone(),
            description.clone(),
            color.clone(),
        ),
        LibraryCommand::DeleteCollection { collection_id } => {
            library.delete_collection(*collection_id)
        }
        LibraryCommand::ChangeCollectionVisibility {
            collection_id,
            is_public,
        } => library.change_collection_visibility(*collection_id, *is_public),
        LibraryCommand::AddFeedToCollection {
            collection_id,
            feed,
        } => library.add_feed_to_collection(*collection_id, feed.clone()),
        LibraryCommand::RemoveFeedFromCollection {
            collection_id,
            feed,
        } => library.remove_feed_from_collection(*collection_id, feed.clone()),
        LibraryCommand::ReorderCollectionFeed {
            collection_id,
            feed,
            new_position,
        } => library.reorder_collection_feed(*collection_id, feed.clone(), *new_position),
        LibraryCommand::Snapshot => library.snapshot(),
        LibraryCommand::SyncUserData { upload } => sync_user_data(library, upload),
    }
}

/// Diff a device's uploaded library against current state. Runs each derived
/// subcommand against a scratch copy so later subcommands see the effect of
/// earlier ones within the same batch.
fn sync_user_data(
    library: &UserLibrary,
    upload: &podsync_types::SyncUpload,
) -> Result<Vec<LibraryEvent>, LibraryError> {
    let mut scratch = library.clone();
    let mut events = Vec::new();

    for subscription in &upload.subscriptions {
        if scratch.is_subscribed(&subscription.feed) {
            continue;
        }
        let emitted = scratch.subscribe(subscription.feed.clone(), subscription.subscribed_at)?;
        for event in &emitted {
            scratch.apply_new(event);
        }
        events.extend(emitted);
    }

    for status in &upload.play_statuses {
        let newer_exists = scratch
            .play_statuses()
            .get(&status.item)
            .map(|existing| existing.updated_at >= status.timestamp)
            .unwrap_or(false);
        if newer_exists {
            continue;
        }
        let emitted = scratch.record_play(
            status.feed.clone(),
            status.item.clone(),
            status.position,
            status.played,
            status.timestamp,
        )?;
        for event in &emitted {
            scratch.apply_new(event);
        }
        events.extend(emitted);
    }

    Ok(events)
}
