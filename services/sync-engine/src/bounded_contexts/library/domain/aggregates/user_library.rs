use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::bounded_contexts::library::domain::errors::LibraryError;
use crate::bounded_contexts::library::domain::events::{
    CheckpointCollection, CheckpointPlayStatus, CheckpointPlaylist, CheckpointPlaylistItem,
    CheckpointPrivacyEntry, CheckpointSubscription, CollectionCreated, CollectionDeleted,
    CollectionFeedReordered, CollectionUpdated, CollectionVisibilityChanged, EpisodeSaved,
    EpisodeShared, EpisodeUnsaved, EventsRemoved, FeedAddedToCollection,
    FeedRemovedFromCollection, LibraryEvent, PlayRecorded, PlaylistCreated, PlaylistDeleted,
    PlaylistItemRef, PlaylistReordered, PlaylistUpdated, PlaylistVisibilityChanged,
    PositionUpdated, PrivacyChanged, UserCheckpoint, UserSubscribed, UserUnsubscribed,
};
use crate::bounded_contexts::library::domain::value_objects::{
    CollectionId, CollectionTitle, PlaylistId, PlaylistName, PrivacySetting, SourceFeedId,
    SourceItemId, UserId,
};

pub const DEFAULT_COLLECTION_TITLE: &str = "All Subscriptions";
pub const IMPLICIT_SAVES_PLAYLIST: &str = "Saved Episodes";

#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    pub rss_source_id: Uuid,
    pub subscribed_at: DateTime<Utc>,
    pub unsubscribed_at: Option<DateTime<Utc>>,
}

impl Subscription {
    pub fn is_active(&self) -> bool {
        match self.unsubscribed_at {
            None => true,
            Some(unsubscribed_at) => self.subscribed_at > unsubscribed_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayStatus {
    pub feed: SourceFeedId,
    pub position: i64,
    pub played: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistItem {
    pub feed: SourceFeedId,
    pub item: SourceItemId,
    pub position: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Playlist {
    pub name: String,
    pub description: Option<String>,
    pub is_public: bool,
    pub items: Vec<PlaylistItem>,
}

impl Playlist {
    fn index_of(&self, feed: &SourceFeedId, item: &SourceItemId) -> Option<usize> {
        self.items
            .iter()
            .position(|entry| &entry.feed == feed && &entry.item == item)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Collection {
    pub title: String,
    pub description: Option<String>,
    pub color: Option<String>,
    pub is_default: bool,
    pub is_public: bool,
    pub feed_ids: Vec<SourceFeedId>,
}

pub type PrivacyScope = (Option<SourceFeedId>, Option<SourceItemId>);

/// In-memory state machine for one user. The unit of consistency: rebuilt
/// by replaying the stream, mutated only through `apply`.
#[derive(Debug, Clone, PartialEq)]
pub struct UserLibrary {
    user_id: UserId,
    subscriptions: BTreeMap<SourceFeedId, Subscription>,
    play_statuses: BTreeMap<SourceItemId, PlayStatus>,
    playlists: BTreeMap<PlaylistId, Playlist>,
    collections: BTreeMap<CollectionId, Collection>,
    privacy: BTreeMap<PrivacyScope, PrivacySetting>,
    stream_version: i64,
}

impl UserLibrary {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            subscriptions: BTreeMap::new(),
            play_statuses: BTreeMap::new(),
            playlists: BTreeMap::new(),
            collections: BTreeMap::new(),
            privacy: BTreeMap::new(),
            stream_version: 0,
        }
    }

    // Getters

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn stream_version(&self) -> i64 {
        self.stream_version
    }

    pub fn subscriptions(&self) -> &BTreeMap<SourceFeedId, Subscription> {
        &self.subscriptions
    }

    pub fn play_statuses(&self) -> &BTreeMap<SourceItemId, PlayStatus> {
        &self.play_statuses
    }

    pub fn playlists(&self) -> &BTreeMap<PlaylistId, Playlist> {
        &self.playlists
    }

    pub fn collections(&self) -> &BTreeMap<CollectionId, Collection> {
        &self.collections
    }

    pub fn privacy(&self) -> &BTreeMap<PrivacyScope, PrivacySetting> {
        &self.privacy
    }

    pub fn is_subscribed(&self, feed: &SourceFeedId) -> bool {
        self.subscriptions
            .get(feed)
            .map(Subscription::is_active)
            .unwrap_or(false)
    }

    pub fn default_collection(&self) -> Option<(&CollectionId, &Collection)> {
        self.collections.iter().find(|(_, c)| c.is_default)
    }

    fn saves_playlist(&self) -> Option<PlaylistId> {
        self.playlists
            .iter()
            .find(|(_, p)| p.name == IMPLICIT_SAVES_PLAYLIST)
            .map(|(id, _)| *id)
    }

    // ------------------------------------------------------------------
    // Command handlers. Pure: (state, command) → events | error. State is
    // only mutated later, through apply.
    // ------------------------------------------------------------------

    pub fn subscribe(
        &self,
        feed: SourceFeedId,
        now: DateTime<Utc>,
    ) -> Result<Vec<LibraryEvent>, LibraryError> {
        // Re-subscribing keeps the stable feed record id.
        let rss_source_id = self
            .subscriptions
            .get(&feed)
            .map(|s| s.rss_source_id)
            .unwrap_or_else(Uuid::new_v4);

        let mut events = vec![LibraryEvent::UserSubscribed(UserSubscribed {
            feed: feed.clone(),
            rss_source_id,
            subscribed_at: now,
        })];

        // A subscribed user always has exactly one default collection.
        if self.default_collection().is_none() {
            let collection_id = CollectionId::new();
            events.push(LibraryEvent::CollectionCreated(CollectionCreated {
                collection_id,
                title: DEFAULT_COLLECTION_TITLE.to_string(),
                description: None,
                color: None,
                is_default: true,
                is_public: false,
            }));
            events.push(LibraryEvent::FeedAddedToCollection(FeedAddedToCollection {
                collection_id,
                feed,
            }));
        } else if let Some((collection_id, collection)) = self.default_collection() {
            if !collection.feed_ids.contains(&feed) {
                events.push(LibraryEvent::FeedAddedToCollection(FeedAddedToCollection {
                    collection_id: *collection_id,
                    feed,
                }));
            }
        }

        Ok(events)
    }

    pub fn unsubscribe(
        &self,
        feed: SourceFeedId,
        now: DateTime<Utc>,
    ) -> Result<Vec<LibraryEvent>, LibraryError> {
        if !self.is_subscribed(&feed) {
            return Err(LibraryError::NotSubscribed);
        }
        Ok(vec![LibraryEvent::UserUnsubscribed(UserUnsubscribed {
            feed,
            unsubscribed_at: now,
        })])
    }

    pub fn record_play(
        &self,
        feed: SourceFeedId,
        item: SourceItemId,
        position: i64,
        played: bool,
        timestamp: DateTime<Utc>,
    ) -> Result<Vec<LibraryEvent>, LibraryError> {
        if position < 0 {
            return Err(LibraryError::InvalidPosition);
        }
        Ok(vec![LibraryEvent::PlayRecorded(PlayRecorded {
            feed,
            item,
            position,
            played,
            timestamp,
        })])
    }

    pub fn update_position(
        &self,
        feed: SourceFeedId,
        item: SourceItemId,
        position: i64,
        timestamp: DateTime<Utc>,
    ) -> Result<Vec<LibraryEvent>, LibraryError> {
        if position < 0 {
            return Err(LibraryError::InvalidPosition);
        }
        Ok(vec![LibraryEvent::PositionUpdated(PositionUpdated {
            feed,
            item,
            position,
            timestamp,
        })])
    }

    pub fn save_episode(
        &self,
        playlist_id: Option<PlaylistId>,
        feed: SourceFeedId,
        item: SourceItemId,
        item_title: Option<String>,
        feed_title: Option<String>,
    ) -> Result<Vec<LibraryEvent>, LibraryError> {
        if !self.is_subscribed(&feed) {
            return Err(LibraryError::FeedNotSubscribed);
        }
        // No explicit playlist: target the implicit saves playlist, creating
        // a fresh id when the user has none yet (apply materializes it).
        let playlist_id = playlist_id
            .or_else(|| self.saves_playlist())
            .unwrap_or_else(PlaylistId::new);

        Ok(vec![LibraryEvent::EpisodeSaved(EpisodeSaved {
            playlist_id,
            feed,
            item,
            item_title,
            feed_title,
        })])
    }

    pub fn unsave_episode(
        &self,
        playlist_id: PlaylistId,
        feed: SourceFeedId,
        item: SourceItemId,
    ) -> Result<Vec<LibraryEvent>, LibraryError> {
        let saved = self
            .playlists
            .get(&playlist_id)
            .and_then(|p| p.index_of(&feed, &item))
            .is_some();
        if !saved {
            return Err(LibraryError::EpisodeNotSaved);
        }
        Ok(vec![LibraryEvent::EpisodeUnsaved(EpisodeUnsaved {
            playlist_id,
            feed,
            item,
        })])
    }

    pub fn share_episode(
        &self,
        feed: SourceFeedId,
        item: SourceItemId,
    ) -> Result<Vec<LibraryEvent>, LibraryError> {
        Ok(vec![LibraryEvent::EpisodeShared(EpisodeShared {
            feed,
            item,
        })])
    }

    pub fn change_privacy(
        &self,
        privacy: PrivacySetting,
        feed: Option<SourceFeedId>,
        item: Option<SourceItemId>,
    ) -> Result<Vec<LibraryEvent>, LibraryError> {
        Ok(vec![LibraryEvent::PrivacyChanged(PrivacyChanged {
            privacy,
            feed,
            item,
        })])
    }

    pub fn remove_events(
        &self,
        feed: Option<SourceFeedId>,
        item: Option<SourceItemId>,
    ) -> Result<Vec<LibraryEvent>, LibraryError> {
        Ok(vec![LibraryEvent::EventsRemoved(EventsRemoved {
            feed,
            item,
        })])
    }

    pub fn create_playlist(
        &self,
        playlist_id: Option<PlaylistId>,
        name: String,
        description: Option<String>,
        is_public: bool,
    ) -> Result<Vec<LibraryEvent>, LibraryError> {
        let name = PlaylistName::new(name).map_err(|_| LibraryError::NameRequired)?;
        if let Some(id) = playlist_id {
            if self.playlists.contains_key(&id) {
                return Err(LibraryError::PlaylistAlreadyExists);
            }
        }
        Ok(vec![LibraryEvent::PlaylistCreated(PlaylistCreated {
            playlist_id: playlist_id.unwrap_or_default(),
            name: name.value().to_string(),
            description,
            is_public,
        })])
    }

    pub fn update_playlist(
        &self,
        playlist_id: PlaylistId,
        name: Option<String>,
        description: Option<String>,
    ) -> Result<Vec<LibraryEvent>, LibraryError> {
        if !self.playlists.contains_key(&playlist_id) {
            return Err(LibraryError::PlaylistNotFound);
        }
        let name = match name {
            Some(raw) => Some(
                PlaylistName::new(raw)
                    .map(|n| n.value().to_string())
                    .map_err(|_| LibraryError::NameRequired)?,
            ),
            None => None,
        };
        Ok(vec![LibraryEvent::PlaylistUpdated(PlaylistUpdated {
            playlist_id,
            name,
            description,
        })])
    }

    pub fn delete_playlist(
        &self,
        playlist_id: PlaylistId,
    ) -> Result<Vec<LibraryEvent>, LibraryError> {
        if !self.playlists.contains_key(&playlist_id) {
            return Err(LibraryError::PlaylistNotFound);
        }
        Ok(vec![LibraryEvent::PlaylistDeleted(PlaylistDeleted {
            playlist_id,
        })])
    }

    pub fn reorder_playlist(
        &self,
        playlist_id: PlaylistId,
        feed: SourceFeedId,
        item: SourceItemId,
        new_position: usize,
    ) -> Result<Vec<LibraryEvent>, LibraryError> {
        let playlist = self
            .playlists
            .get(&playlist_id)
            .ok_or(LibraryError::PlaylistNotFound)?;
        let current = playlist
            .index_of(&feed, &item)
            .ok_or(LibraryError::EpisodeNotSaved)?;
        if new_position >= playlist.items.len() {
            return Err(LibraryError::InvalidPosition);
        }

        let mut order: Vec<PlaylistItemRef> = playlist
            .items
            .iter()
            .map(|entry| PlaylistItemRef {
                feed: entry.feed.clone(),
                item: entry.item.clone(),
            })
            .collect();
        let moved = order.remove(current);
        order.insert(new_position, moved);

        Ok(vec![LibraryEvent::PlaylistReordered(PlaylistReordered {
            playlist_id,
            item_order: order,
        })])
    }

    pub fn change_playlist_visibility(
        &self,
        playlist_id: PlaylistId,
        is_public: bool,
    ) -> Result<Vec<LibraryEvent>, LibraryError> {
        if !self.playlists.contains_key(&playlist_id) {
            return Err(LibraryError::PlaylistNotFound);
        }
        Ok(vec![LibraryEvent::PlaylistVisibilityChanged(
            PlaylistVisibilityChanged {
                playlist_id,
                is_public,
            },
        )])
    }

    pub fn create_collection(
        &self,
        collection_id: Option<CollectionId>,
        title: String,
        description: Option<String>,
        color: Option<String>,
        is_default: bool,
        is_public: bool,
    ) -> Result<Vec<LibraryEvent>, LibraryError> {
        let title = CollectionTitle::new(title).map_err(|_| LibraryError::NameRequired)?;
        if is_default && self.default_collection().is_some() {
            return Err(LibraryError::DefaultCollectionAlreadyExists);
        }
        Ok(vec![LibraryEvent::CollectionCreated(CollectionCreated {
            collection_id: collection_id.unwrap_or_default(),
            title: title.value().to_string(),
            description,
            color,
            is_default,
            is_public,
        })])
    }

    pub fn update_collection(
        &self,
        collection_id: CollectionId,
        title: Option<String>,
        description: Option<String>,
        color: Option<String>,
    ) -> Result<Vec<LibraryEvent>, LibraryError> {
        if !self.collections.contains_key(&collection_id) {
            return Err(LibraryError::CollectionNotFound);
        }
        let title = match title {
            Some(raw) => Some(
                CollectionTitle::new(raw)
                    .map(|t| t.value().to_string())
                    .map_err(|_| LibraryError::NameRequired)?,
            ),
            None => None,
        };
        Ok(vec![LibraryEvent::CollectionUpdated(CollectionUpdated {
            collection_id,
            title,
            description,
            color,
        })])
    }

    pub fn delete_collection(
        &self,
        collection_id: CollectionId,
    ) -> Result<Vec<LibraryEvent>, LibraryError> {
        let collection = self
            .collections
            .get(&collection_id)
            .ok_or(LibraryError::CollectionNotFound)?;
        if collection.is_default {
            return Err(LibraryError::CannotDeleteDefaultCollection);
        }
        Ok(vec![LibraryEvent::CollectionDeleted(CollectionDeleted {
            collection_id,
        })])
    }

    pub fn change_collection_visibility(
        &self,
        collection_id: CollectionId,
        is_public: bool,
    ) -> Result<Vec<LibraryEvent>, LibraryError> {
        if !self.collections.contains_key(&collection_id) {
            return Err(LibraryError::CollectionNotFound);
        }
        Ok(vec![LibraryEvent::CollectionVisibilityChanged(
            CollectionVisibilityChanged {
                collection_id,
                is_public,
            },
        )])
    }

    pub fn add_feed_to_collection(
        &self,
        collection_id: CollectionId,
        feed: SourceFeedId,
    ) -> Result<Vec<LibraryEvent>, LibraryError> {
        let collection = self
            .collections
            .get(&collection_id)
            .ok_or(LibraryError::CollectionNotFound)?;
        if !self.is_subscribed(&feed) {
            return Err(LibraryError::FeedNotSubscribed);
        }
        if collection.feed_ids.contains(&feed) {
            // Already present; nothing to record.
            return Ok(vec![]);
        }
        Ok(vec![LibraryEvent::FeedAddedToCollection(
            FeedAddedToCollection {
                collection_id,
                feed,
            },
        )])
    }

    pub fn remove_feed_from_collection(
        &self,
        collection_id: CollectionId,
        feed: SourceFeedId,
    ) -> Result<Vec<LibraryEvent>, LibraryError> {
        let collection = self
            .collections
            .get(&collection_id)
            .ok_or(LibraryError::CollectionNotFound)?;
        if !collection.feed_ids.contains(&feed) {
            return Ok(vec![]);
        }
        Ok(vec![LibraryEvent::FeedRemovedFromCollection(
            FeedRemovedFromCollection {
                collection_id,
                feed,
            },
        )])
    }

    pub fn reorder_collection_feed(
        &self,
        collection_id: CollectionId,
        feed: SourceFeedId,
        new_position: usize,
    ) -> Result<Vec<LibraryEvent>, LibraryError> {
        let collection = self
            .collections
            .get(&collection_id)
            .ok_or(LibraryError::CollectionNotFound)?;
        let current = collection
            .feed_ids
            .iter()
            .position(|f| f == &feed)
            .ok_or(LibraryError::FeedNotInCollection)?;
        if new_position >= collection.feed_ids.len() {
            return Err(LibraryError::InvalidPosition);
        }

        let mut feed_order = collection.feed_ids.clone();
        let moved = feed_order.remove(current);
        feed_order.insert(new_position, moved);

        Ok(vec![LibraryEvent::CollectionFeedReordered(
            CollectionFeedReordered {
                collection_id,
                feed,
                feed_order,
            },
        )])
    }

    /// System command: encode the full current state as a checkpoint event.
    pub fn snapshot(&self) -> Result<Vec<LibraryEvent>, LibraryError> {
        Ok(vec![LibraryEvent::UserCheckpoint(self.to_checkpoint())])
    }

    pub fn to_checkpoint(&self) -> UserCheckpoint {
        UserCheckpoint {
            subscriptions: self
                .subscriptions
                .iter()
                .map(|(feed, sub)| {
                    (
                        feed.clone(),
                        CheckpointSubscription {
                            rss_source_id: sub.rss_source_id,
                            subscribed_at: sub.subscribed_at,
                            unsubscribed_at: sub.unsubscribed_at,
                        },
                    )
                })
                .collect(),
            play_statuses: self
                .play_statuses
                .iter()
                .map(|(item, status)| {
                    (
                        item.clone(),
                        CheckpointPlayStatus {
                            feed: status.feed.clone(),
                            position: status.position,
                            played: status.played,
                            updated_at: status.updated_at,
                        },
                    )
                })
                .collect(),
            playlists: self
                .playlists
                .iter()
                .map(|(id, playlist)| {
                    (
                        *id,
                        CheckpointPlaylist {
                            name: playlist.name.clone(),
                            description: playlist.description.clone(),
                            is_public: playlist.is_public,
                            items: playlist
                                .items
                                .iter()
                                .map(|entry| CheckpointPlaylistItem {
                                    feed: entry.feed.clone(),
                                    item: entry.item.clone(),
                                    position: entry.position,
                                })
                                .collect(),
                        },
                    )
                })
                .collect(),
            collections: self
                .collections
                .iter()
                .map(|(id, collection)| {
                    (
                        *id,
                        CheckpointCollection {
                            title: collection.title.clone(),
                            description: collection.description.clone(),
                            color: collection.color.clone(),
                            is_default: collection.is_default,
                            is_public: collection.is_public,
                            feed_ids: collection.feed_ids.clone(),
                        },
                    )
                })
                .collect(),
            privacy: self
                .privacy
                .iter()
                .map(|((feed, item), privacy)| CheckpointPrivacyEntry {
                    feed: feed.clone(),
                    item: item.clone(),
                    privacy: *privacy,
                })
                .collect(),
        }
    }

    // ------------------------------------------------------------------
    // Apply. Total: any event against any state yields a next state. An
    // event referencing a missing entity leaves state unchanged; replay
    // must never fail.
    // ------------------------------------------------------------------

    /// Apply a freshly-emitted event, bumping the version by one.
    pub fn apply_new(&mut self, event: &LibraryEvent) {
        self.apply_event(event);
        self.stream_version += 1;
    }

    /// Apply an event read back from the store at its recorded version.
    /// After compaction the stream starts mid-sequence, so the version comes
    /// from the record, not from counting.
    pub fn apply_recorded(&mut self, recorded_version: i64, event: &LibraryEvent) {
        self.apply_event(event);
        self.stream_version = recorded_version;
    }

    /// Adopt a store-reported version without applying anything. Only used
    /// when replay finds a stream whose retained events end below the
    /// stream's recorded high-water mark.
    pub fn fast_forward_version(&mut self, version: i64) {
        if version > self.stream_version {
            self.stream_version = version;
        }
    }

    fn apply_event(&mut self, event: &LibraryEvent) {
        match event {
            LibraryEvent::UserSubscribed(e) => {
                self.subscriptions.insert(
                    e.feed.clone(),
                    Subscription {
                        rss_source_id: e.rss_source_id,
                        subscribed_at: e.subscribed_at,
                        unsubscribed_at: None,
                    },
                );
            }
            LibraryEvent::UserUnsubscribed(e) => {
                if let Some(sub) = self.subscriptions.get_mut(&e.feed) {
                    sub.unsubscribed_at = Some(e.unsubscribed_at);
                }
            }
            LibraryEvent::PlayRecorded(e) => {
                self.play_statuses.insert(
                    e.item.clone(),
                    PlayStatus {
                        feed: e.feed.clone(),
                        position: e.position,
                        played: e.played,
                        updated_at: e.timestamp,
                    },
                );
            }
            LibraryEvent::PositionUpdated(e) => {
                let played = self
                    .play_statuses
                    .get(&e.item)
                    .map(|s| s.played)
                    .unwrap_or(false);
                self.play_statuses.insert(
                    e.item.clone(),
                    PlayStatus {
                        feed: e.feed.clone(),
                        position: e.position,
                        played,
                        updated_at: e.timestamp,
                    },
                );
            }
            LibraryEvent::EpisodeSaved(e) => {
                let playlist = self
                    .playlists
                    .entry(e.playlist_id)
                    .or_insert_with(|| Playlist {
                        name: IMPLICIT_SAVES_PLAYLIST.to_string(),
                        description: None,
                        is_public: false,
                        items: Vec::new(),
                    });
                if playlist.index_of(&e.feed, &e.item).is_none() {
                    playlist.items.push(PlaylistItem {
                        feed: e.feed.clone(),
                        item: e.item.clone(),
                        position: None,
                    });
                }
            }
            LibraryEvent::EpisodeUnsaved(e) => {
                if let Some(playlist) = self.playlists.get_mut(&e.playlist_id) {
                    if let Some(index) = playlist.index_of(&e.feed, &e.item) {
                        playlist.items.remove(index);
                    }
                }
            }
            LibraryEvent::EpisodeShared(_) => {}
            LibraryEvent::PrivacyChanged(e) => {
                self.privacy
                    .insert((e.feed.clone(), e.item.clone()), e.privacy);
            }
            LibraryEvent::EventsRemoved(_) => {
                // Removes projected traces only; aggregate state is untouched.
            }
            LibraryEvent::PlaylistCreated(e) => {
                self.playlists.insert(
                    e.playlist_id,
                    Playlist {
                        name: e.name.clone(),
                        description: e.description.clone(),
                        is_public: e.is_public,
                        items: Vec::new(),
                    },
                );
            }
            LibraryEvent::PlaylistUpdated(e) => {
                if let Some(playlist) = self.playlists.get_mut(&e.playlist_id) {
                    if let Some(name) = &e.name {
                        playlist.name = name.clone();
                    }
                    if let Some(description) = &e.description {
                        playlist.description = Some(description.clone());
                    }
                }
            }
            LibraryEvent::PlaylistDeleted(e) => {
                self.playlists.remove(&e.playlist_id);
            }
            LibraryEvent::PlaylistReordered(e) => {
                if let Some(playlist) = self.playlists.get_mut(&e.playlist_id) {
                    let mut reordered = Vec::with_capacity(playlist.items.len());
                    for entry_ref in &e.item_order {
                        if let Some(index) = playlist
                            .items
                            .iter()
                            .position(|i| i.feed == entry_ref.feed && i.item == entry_ref.item)
                        {
                            reordered.push(playlist.items.remove(index));
                        }
                    }
                    // Entries the event does not mention keep their relative
                    // order after the reordered ones.
                    reordered.append(&mut playlist.items);
                    playlist.items = reordered;
                }
            }
            LibraryEvent::PlaylistVisibilityChanged(e) => {
                if let Some(playlist) = self.playlists.get_mut(&e.playlist_id) {
                    playlist.is_public = e.is_public;
                }
            }
            LibraryEvent::CollectionCreated(e) => {
                self.collections.insert(
                    e.collection_id,
                    Collection {
                        title: e.title.clone(),
                        description: e.description.clone(),
                        color: e.color.clone(),
                        is_default: e.is_default,
                        is_public: e.is_public,
                        feed_ids: Vec::new(),
                    },
                );
            }
            LibraryEvent::CollectionUpdated(e) => {
                if let Some(collection) = self.collections.get_mut(&e.collection_id) {
                    if let Some(title) = &e.title {
                        collection.title = title.clone();
                    }
                    if let Some(description) = &e.description {
                        collection.description = Some(description.clone());
                    }
                    if let Some(color) = &e.color {
                        collection.color = Some(color.clone());
                    }
                }
            }
            LibraryEvent::CollectionDeleted(e) => {
                self.collections.remove(&e.collection_id);
            }
            LibraryEvent::CollectionVisibilityChanged(e) => {
                if let Some(collection) = self.collections.get_mut(&e.collection_id) {
                    collection.is_public = e.is_public;
                }
            }
            LibraryEvent::FeedAddedToCollection(e) => {
                if let Some(collection) = self.collections.get_mut(&e.collection_id) {
                    if !collection.feed_ids.contains(&e.feed) {
                        collection.feed_ids.push(e.feed.clone());
                    }
                }
            }
            LibraryEvent::FeedRemovedFromCollection(e) => {
                if let Some(collection) = self.collections.get_mut(&e.collection_id) {
                    collection.feed_ids.retain(|f| f != &e.feed);
                }
            }
            LibraryEvent::CollectionFeedReordered(e) => {
                if let Some(collection) = self.collections.get_mut(&e.collection_id) {
                    let mut reordered: Vec<SourceFeedId> = e
                        .feed_order
                        .iter()
                        .filter(|f| collection.feed_ids.contains(f))
                        .cloned()
                        .collect();
                    for feed in &collection.feed_ids {
                        if !reordered.contains(feed) {
                            reordered.push(feed.clone());
                        }
                    }
                    collection.feed_ids = reordered;
                }
            }
            LibraryEvent::UserCheckpoint(e) => {
                self.restore_checkpoint(e);
            }
            LibraryEvent::PopularityRecalculated(_) => {
                // System-stream event; never part of a user stream.
            }
        }
    }

    /// Checkpoint semantics are REPLACE, never merge.
    fn restore_checkpoint(&mut self, checkpoint: &UserCheckpoint) {
        self.subscriptions = checkpoint
            .subscriptions
            .iter()
            .map(|(feed, sub)| {
                (
                    feed.clone(),
                    Subscription {
                        rss_source_id: sub.rss_source_id,
                        subscribed_at: sub.subscribed_at,
                        unsubscribed_at: sub.unsubscribed_at,
                    },
                )
            })
            .collect();
        self.play_statuses = checkpoint
            .play_statuses
            .iter()
            .map(|(item, status)| {
                (
                    item.clone(),
                    PlayStatus {
                        feed: status.feed.clone(),
                        position: status.position,
                        played: status.played,
                        updated_at: status.updated_at,
                    },
                )
            })
            .collect();
        self.playlists = checkpoint
            .playlists
            .iter()
            .map(|(id, playlist)| {
                (
                    *id,
                    Playlist {
                        name: playlist.name.clone(),
                        description: playlist.description.clone(),
                        is_public: playlist.is_public,
                        items: playlist
                            .items
                            .iter()
                            .map(|entry| PlaylistItem {
                                feed: entry.feed.clone(),
                                item: entry.item.clone(),
                                position: entry.position,
                            })
                            .collect(),
                    },
                )
            })
            .collect();
        self.collections = checkpoint
            .collections
            .iter()
            .map(|(id, collection)| {
                (
                    *id,
                    Collection {
                        title: collection.title.clone(),
                        description: collection.description.clone(),
                        color: collection.color.clone(),
                        is_default: collection.is_default,
                        is_public: collection.is_public,
                        feed_ids: collection.feed_ids.clone(),
                    },
                )
            })
            .collect();
        self.privacy = checkpoint
            .privacy
            .iter()
            .map(|entry| ((entry.feed.clone(), entry.item.clone()), entry.privacy))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn feed(n: &str) -> SourceFeedId {
        SourceFeedId::from_url(&format!("https://example.org/{}.xml", n))
    }

    fn item(n: &str) -> SourceItemId {
        SourceItemId::from_parts(n, &format!("https://example.org/{}.mp3", n))
    }

    fn library() -> UserLibrary {
        UserLibrary::new(UserId::new("u1").unwrap())
    }

    fn apply_all(library: &mut UserLibrary, events: Vec<LibraryEvent>) {
        for event in &events {
            library.apply_new(event);
        }
    }

    fn subscribed(feed_id: SourceFeedId) -> UserLibrary {
        let mut lib = library();
        let events = lib.subscribe(feed_id, Utc::now()).unwrap();
        apply_all(&mut lib, events);
        lib
    }

    #[test]
    fn first_subscribe_creates_default_collection() {
        let lib = library();
        let events = lib.subscribe(feed("f1"), Utc::now()).unwrap();

        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], LibraryEvent::UserSubscribed(_)));
        match &events[1] {
            LibraryEvent::CollectionCreated(e) => {
                assert!(e.is_default);
                assert_eq!(e.title, DEFAULT_COLLECTION_TITLE);
            }
            other => panic!("expected CollectionCreated, got {:?}", other),
        }
        assert!(matches!(events[2], LibraryEvent::FeedAddedToCollection(_)));
    }

    #[test]
    fn first_subscribe_creates_default_even_with_other_collections() {
        let mut lib = library();
        let events = lib
            .create_collection(None, "Tech".into(), None, None, false, false)
            .unwrap();
        apply_all(&mut lib, events);

        let events = lib.subscribe(feed("f1"), Utc::now()).unwrap();
        apply_all(&mut lib, events);
        let defaults: Vec<_> = lib.collections().values().filter(|c| c.is_default).collect();
        assert_eq!(defaults.len(), 1);
    }

    #[test]
    fn second_subscribe_reuses_default_collection() {
        let mut lib = library();
        let events = lib.subscribe(feed("f1"), Utc::now()).unwrap();
        apply_all(&mut lib, events);

        let events = lib.subscribe(feed("f2"), Utc::now()).unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], LibraryEvent::UserSubscribed(_)));
        assert!(matches!(events[1], LibraryEvent::FeedAddedToCollection(_)));

        apply_all(&mut lib, events);
        let defaults: Vec<_> = lib.collections().values().filter(|c| c.is_default).collect();
        assert_eq!(defaults.len(), 1);
        assert_eq!(defaults[0].feed_ids.len(), 2);
    }

    #[test]
    fn resubscribe_keeps_rss_source_id() {
        let mut lib = library();
        let events = lib.subscribe(feed("f1"), Utc::now()).unwrap();
        apply_all(&mut lib, events);
        let original = lib.subscriptions().get(&feed("f1")).unwrap().rss_source_id;

        let events = lib.unsubscribe(feed("f1"), Utc::now()).unwrap();
        apply_all(&mut lib, events);
        assert!(!lib.is_subscribed(&feed("f1")));

        let events = lib.subscribe(feed("f1"), Utc::now()).unwrap();
        apply_all(&mut lib, events);
        assert!(lib.is_subscribed(&feed("f1")));
        assert_eq!(
            lib.subscriptions().get(&feed("f1")).unwrap().rss_source_id,
            original
        );
    }

    #[test]
    fn unsubscribe_requires_active_subscription() {
        let lib = library();
        assert_eq!(
            lib.unsubscribe(feed("f1"), Utc::now()),
            Err(LibraryError::NotSubscribed)
        );
    }

    #[test]
    fn record_play_rejects_negative_position() {
        let lib = subscribed(feed("f1"));
        assert_eq!(
            lib.record_play(feed("f1"), item("e1"), -1, false, Utc::now()),
            Err(LibraryError::InvalidPosition)
        );
    }

    #[test]
    fn play_and_position_update_state() {
        let mut lib = subscribed(feed("f1"));
        let events = lib
            .record_play(feed("f1"), item("e1"), 120, false, Utc::now())
            .unwrap();
        apply_all(&mut lib, events);
        assert_eq!(lib.play_statuses().get(&item("e1")).unwrap().position, 120);

        let events = lib
            .update_position(feed("f1"), item("e1"), 240, Utc::now())
            .unwrap();
        apply_all(&mut lib, events);
        let status = lib.play_statuses().get(&item("e1")).unwrap();
        assert_eq!(status.position, 240);
        assert!(!status.played);
    }

    #[test]
    fn position_update_preserves_played_flag() {
        let mut lib = subscribed(feed("f1"));
        let events = lib
            .record_play(feed("f1"), item("e1"), 300, true, Utc::now())
            .unwrap();
        apply_all(&mut lib, events);

        let events = lib
            .update_position(feed("f1"), item("e1"), 10, Utc::now())
            .unwrap();
        apply_all(&mut lib, events);
        assert!(lib.play_statuses().get(&item("e1")).unwrap().played);
    }

    #[test]
    fn save_requires_subscription() {
        let lib = library();
        assert_eq!(
            lib.save_episode(None, feed("f1"), item("e1"), None, None),
            Err(LibraryError::FeedNotSubscribed)
        );
    }

    #[test]
    fn save_without_playlist_materializes_saves_playlist() {
        let mut lib = subscribed(feed("f1"));
        let events = lib
            .save_episode(None, feed("f1"), item("e1"), Some("Ep 1".into()), None)
            .unwrap();
        apply_all(&mut lib, events);

        let (first_id, playlist) = lib.playlists().iter().next().unwrap();
        let first_id = *first_id;
        assert_eq!(playlist.name, IMPLICIT_SAVES_PLAYLIST);
        assert_eq!(playlist.items.len(), 1);

        // A second save reuses the same implicit playlist.
        let events = lib
            .save_episode(None, feed("f1"), item("e2"), None, None)
            .unwrap();
        apply_all(&mut lib, events);
        assert_eq!(lib.playlists().len(), 1);
        assert_eq!(lib.playlists().get(&first_id).unwrap().items.len(), 2);
    }

    #[test]
    fn unsave_requires_saved_episode() {
        let mut lib = subscribed(feed("f1"));
        assert_eq!(
            lib.unsave_episode(PlaylistId::new(), feed("f1"), item("e1")),
            Err(LibraryError::EpisodeNotSaved)
        );

        let events = lib
            .save_episode(None, feed("f1"), item("e1"), None, None)
            .unwrap();
        let playlist_id = match &events[0] {
            LibraryEvent::EpisodeSaved(e) => e.playlist_id,
            other => panic!("expected EpisodeSaved, got {:?}", other),
        };
        apply_all(&mut lib, events);

        let events = lib
            .unsave_episode(playlist_id, feed("f1"), item("e1"))
            .unwrap();
        apply_all(&mut lib, events);
        assert!(lib.playlists().get(&playlist_id).unwrap().items.is_empty());
    }

    #[test]
    fn create_playlist_validates_name_and_collisions() {
        let mut lib = library();
        assert_eq!(
            lib.create_playlist(None, "  ".into(), None, false),
            Err(LibraryError::NameRequired)
        );

        let id = PlaylistId::new();
        let events = lib
            .create_playlist(Some(id), "Commute".into(), None, false)
            .unwrap();
        apply_all(&mut lib, events);
        assert_eq!(
            lib.create_playlist(Some(id), "Commute again".into(), None, false),
            Err(LibraryError::PlaylistAlreadyExists)
        );
    }

    #[test]
    fn reorder_playlist_moves_item_and_reports_order() {
        let mut lib = subscribed(feed("f1"));
        let id = PlaylistId::new();
        let events = lib
            .create_playlist(Some(id), "Queue".into(), None, false)
            .unwrap();
        apply_all(&mut lib, events);
        for n in ["a", "b", "c"] {
            let events = lib
                .save_episode(Some(id), feed("f1"), item(n), None, None)
                .unwrap();
            apply_all(&mut lib, events);
        }

        let events = lib.reorder_playlist(id, feed("f1"), item("c"), 0).unwrap();
        match &events[0] {
            LibraryEvent::PlaylistReordered(e) => {
                let order: Vec<_> = e.item_order.iter().map(|r| r.item.clone()).collect();
                assert_eq!(order, vec![item("c"), item("a"), item("b")]);
            }
            other => panic!("expected PlaylistReordered, got {:?}", other),
        }
        apply_all(&mut lib, events);
        let items: Vec<_> = lib
            .playlists()
            .get(&id)
            .unwrap()
            .items
            .iter()
            .map(|entry| entry.item.clone())
            .collect();
        assert_eq!(items, vec![item("c"), item("a"), item("b")]);
    }

    #[test]
    fn reorder_playlist_rejects_out_of_range() {
        let mut lib = subscribed(feed("f1"));
        let id = PlaylistId::new();
        let events = lib
            .create_playlist(Some(id), "Queue".into(), None, false)
            .unwrap();
        apply_all(&mut lib, events);
        let events = lib
            .save_episode(Some(id), feed("f1"), item("a"), None, None)
            .unwrap();
        apply_all(&mut lib, events);

        assert_eq!(
            lib.reorder_playlist(id, feed("f1"), item("a"), 1),
            Err(LibraryError::InvalidPosition)
        );
    }

    #[test]
    fn default_collection_cannot_be_deleted() {
        let mut lib = library();
        let events = lib.subscribe(feed("f1"), Utc::now()).unwrap();
        apply_all(&mut lib, events);
        let (default_id, _) = lib.default_collection().unwrap();
        let default_id = *default_id;
        assert_eq!(
            lib.delete_collection(default_id),
            Err(LibraryError::CannotDeleteDefaultCollection)
        );
    }

    #[test]
    fn only_one_default_collection_allowed() {
        let mut lib = library();
        let events = lib.subscribe(feed("f1"), Utc::now()).unwrap();
        apply_all(&mut lib, events);
        assert_eq!(
            lib.create_collection(None, "Other".into(), None, None, true, false),
            Err(LibraryError::DefaultCollectionAlreadyExists)
        );
    }

    #[test]
    fn add_feed_requires_active_subscription() {
        let mut lib = library();
        let events = lib.subscribe(feed("f1"), Utc::now()).unwrap();
        apply_all(&mut lib, events);
        let (default_id, _) = lib.default_collection().unwrap();
        let default_id = *default_id;

        assert_eq!(
            lib.add_feed_to_collection(default_id, feed("f2")),
            Err(LibraryError::FeedNotSubscribed)
        );

        let events = lib.unsubscribe(feed("f1"), Utc::now()).unwrap();
        apply_all(&mut lib, events);
        assert_eq!(
            lib.add_feed_to_collection(default_id, feed("f1")),
            Err(LibraryError::FeedNotSubscribed)
        );
    }

    #[test]
    fn collection_feeds_have_no_duplicates() {
        let mut lib = library();
        let events = lib.subscribe(feed("f1"), Utc::now()).unwrap();
        apply_all(&mut lib, events);
        let (default_id, _) = lib.default_collection().unwrap();
        let default_id = *default_id;

        // Feed already in the default collection: nothing new to record.
        assert!(lib
            .add_feed_to_collection(default_id, feed("f1"))
            .unwrap()
            .is_empty());
        assert_eq!(
            lib.collections().get(&default_id).unwrap().feed_ids.len(),
            1
        );
    }

    #[test]
    fn reorder_collection_feed_boundaries() {
        let mut lib = library();
        for n in ["a", "b", "c"] {
            let events = lib.subscribe(feed(n), Utc::now()).unwrap();
            apply_all(&mut lib, events);
        }
        let (default_id, _) = lib.default_collection().unwrap();
        let default_id = *default_id;

        // new_position = len-1 succeeds
        let events = lib
            .reorder_collection_feed(default_id, feed("a"), 2)
            .unwrap();
        match &events[0] {
            LibraryEvent::CollectionFeedReordered(e) => {
                assert_eq!(e.feed_order, vec![feed("b"), feed("c"), feed("a")]);
            }
            other => panic!("expected CollectionFeedReordered, got {:?}", other),
        }
        apply_all(&mut lib, events);

        // new_position = len fails
        assert_eq!(
            lib.reorder_collection_feed(default_id, feed("a"), 3),
            Err(LibraryError::InvalidPosition)
        );
        // unknown feed fails
        assert_eq!(
            lib.reorder_collection_feed(default_id, feed("zz"), 0),
            Err(LibraryError::FeedNotInCollection)
        );
    }

    #[test]
    fn reorder_moves_to_front() {
        let mut lib = library();
        for n in ["a", "b", "c"] {
            let events = lib.subscribe(feed(n), Utc::now()).unwrap();
            apply_all(&mut lib, events);
        }
        let (default_id, _) = lib.default_collection().unwrap();
        let default_id = *default_id;

        let events = lib
            .reorder_collection_feed(default_id, feed("c"), 0)
            .unwrap();
        match &events[0] {
            LibraryEvent::CollectionFeedReordered(e) => {
                assert_eq!(e.feed_order, vec![feed("c"), feed("a"), feed("b")]);
            }
            other => panic!("expected CollectionFeedReordered, got {:?}", other),
        }
    }

    #[test]
    fn apply_is_total_for_missing_entities() {
        let mut lib = library();
        let before = lib.clone();
        lib.apply_new(&LibraryEvent::CollectionVisibilityChanged(
            CollectionVisibilityChanged {
                collection_id: CollectionId::new(),
                is_public: true,
            },
        ));
        lib.apply_new(&LibraryEvent::PlaylistDeleted(PlaylistDeleted {
            playlist_id: PlaylistId::new(),
        }));
        lib.apply_new(&LibraryEvent::UserUnsubscribed(UserUnsubscribed {
            feed: feed("ghost"),
            unsubscribed_at: Utc::now(),
        }));

        assert_eq!(lib.subscriptions(), before.subscriptions());
        assert_eq!(lib.playlists(), before.playlists());
        assert_eq!(lib.collections(), before.collections());
        assert_eq!(lib.stream_version(), 3);
    }

    #[test]
    fn checkpoint_replaces_state() {
        let mut source = library();
        for n in ["a", "b"] {
            let events = source.subscribe(feed(n), Utc::now()).unwrap();
            apply_all(&mut source, events);
        }
        let events = source
            .record_play(feed("a"), item("e1"), 10, true, Utc::now())
            .unwrap();
        apply_all(&mut source, events);
        let events = source
            .change_privacy(PrivacySetting::Private, Some(feed("a")), None)
            .unwrap();
        apply_all(&mut source, events);

        let checkpoint = source.to_checkpoint();

        // Applying the checkpoint onto a dirty aggregate fully replaces it.
        let mut target = library();
        let events = target.subscribe(feed("zz"), Utc::now()).unwrap();
        apply_all(&mut target, events);
        target.apply_new(&LibraryEvent::UserCheckpoint(checkpoint));

        assert_eq!(target.subscriptions(), source.subscriptions());
        assert_eq!(target.play_statuses(), source.play_statuses());
        assert_eq!(target.playlists(), source.playlists());
        assert_eq!(target.collections(), source.collections());
        assert_eq!(target.privacy(), source.privacy());
    }

    #[test]
    fn replay_reproduces_state_and_version() {
        let mut lib = library();
        let mut log: Vec<LibraryEvent> = Vec::new();

        let events = lib.subscribe(feed("a"), Utc::now()).unwrap();
        apply_all(&mut lib, events.clone());
        log.extend(events);

        let events = lib.subscribe(feed("b"), Utc::now()).unwrap();
        apply_all(&mut lib, events.clone());
        log.extend(events);

        let events = lib
            .record_play(feed("a"), item("e1"), 42, false, Utc::now())
            .unwrap();
        apply_all(&mut lib, events.clone());
        log.extend(events);

        let mut replayed = library();
        for (index, event) in log.iter().enumerate() {
            replayed.apply_recorded(index as i64 + 1, event);
        }
        assert_eq!(replayed, lib);
        assert_eq!(replayed.stream_version(), log.len() as i64);
    }

    #[test]
    fn snapshot_round_trips_through_empty_aggregate() {
        let mut source = subscribed(feed("f1"));
        let events = source
            .save_episode(None, feed("f1"), item("e1"), None, None)
            .unwrap();
        apply_all(&mut source, events);

        let events = source.snapshot().unwrap();
        assert_eq!(events.len(), 1);

        let mut restored = library();
        restored.apply_recorded(source.stream_version() + 1, &events[0]);
        assert_eq!(restored.subscriptions(), source.subscriptions());
        assert_eq!(restored.playlists(), source.playlists());
        assert_eq!(restored.stream_version(), source.stream_version() + 1);
    }
}
