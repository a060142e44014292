use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::bounded_contexts::library::domain::value_objects::{
    CollectionId, PlaylistId, PrivacySetting, SourceFeedId, SourceItemId,
};
use crate::shared::domain::events::DomainEvent;

// Every user-visible action becomes one of these immutable events. The
// `type` field is the wire discriminator; the enum is the in-process one.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSubscribed {
    pub feed: SourceFeedId,
    pub rss_source_id: Uuid,
    pub subscribed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserUnsubscribed {
    pub feed: SourceFeedId,
    pub unsubscribed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayRecorded {
    pub feed: SourceFeedId,
    pub item: SourceItemId,
    pub position: i64,
    pub played: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionUpdated {
    pub feed: SourceFeedId,
    pub item: SourceItemId,
    pub position: i64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeSaved {
    pub playlist_id: PlaylistId,
    pub feed: SourceFeedId,
    pub item: SourceItemId,
    pub item_title: Option<String>,
    pub feed_title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeUnsaved {
    pub playlist_id: PlaylistId,
    pub feed: SourceFeedId,
    pub item: SourceItemId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeShared {
    pub feed: SourceFeedId,
    pub item: SourceItemId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrivacyChanged {
    pub privacy: PrivacySetting,
    pub feed: Option<SourceFeedId>,
    pub item: Option<SourceItemId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventsRemoved {
    pub feed: Option<SourceFeedId>,
    pub item: Option<SourceItemId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistCreated {
    pub playlist_id: PlaylistId,
    pub name: String,
    pub description: Option<String>,
    pub is_public: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistUpdated {
    pub playlist_id: PlaylistId,
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistDeleted {
    pub playlist_id: PlaylistId,
}

/// A stable reference to one entry of a playlist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistItemRef {
    pub feed: SourceFeedId,
    pub item: SourceItemId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistReordered {
    pub playlist_id: PlaylistId,
    /// Resulting order after the move, so replay needs no recomputation.
    pub item_order: Vec<PlaylistItemRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistVisibilityChanged {
    pub playlist_id: PlaylistId,
    pub is_public: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionCreated {
    pub collection_id: CollectionId,
    pub title: String,
    pub description: Option<String>,
    pub color: Option<String>,
    pub is_default: bool,
    pub is_public: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionUpdated {
    pub collection_id: CollectionId,
    pub title: Option<String>,
    pub description: Option<String>,
    pub color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionDeleted {
    pub collection_id: CollectionId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionVisibilityChanged {
    pub collection_id: CollectionId,
    pub is_public: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedAddedToCollection {
    pub collection_id: CollectionId,
    pub feed: SourceFeedId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedRemovedFromCollection {
    pub collection_id: CollectionId,
    pub feed: SourceFeedId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionFeedReordered {
    pub collection_id: CollectionId,
    pub feed: SourceFeedId,
    /// Resulting order after the move.
    pub feed_order: Vec<SourceFeedId>,
}

// Checkpoint payload. Every section is mandatory: a checkpoint that does
// not cover the full state must fail to decode rather than half-replace it.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointSubscription {
    pub rss_source_id: Uuid,
    pub subscribed_at: DateTime<Utc>,
    pub unsubscribed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointPlayStatus {
    pub feed: SourceFeedId,
    pub position: i64,
    pub played: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointPlaylistItem {
    pub feed: SourceFeedId,
    pub item: SourceItemId,
    pub position: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointPlaylist {
    pub name: String,
    pub description: Option<String>,
    pub is_public: bool,
    pub items: Vec<CheckpointPlaylistItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointCollection {
    pub title: String,
    pub description: Option<String>,
    pub color: Option<String>,
    pub is_default: bool,
    pub is_public: bool,
    pub feed_ids: Vec<SourceFeedId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointPrivacyEntry {
    pub feed: Option<SourceFeedId>,
    pub item: Option<SourceItemId>,
    pub privacy: PrivacySetting,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserCheckpoint {
    pub subscriptions: BTreeMap<SourceFeedId, CheckpointSubscription>,
    pub play_statuses: BTreeMap<SourceItemId, CheckpointPlayStatus>,
    pub playlists: BTreeMap<PlaylistId, CheckpointPlaylist>,
    pub collections: BTreeMap<CollectionId, CheckpointCollection>,
    pub privacy: Vec<CheckpointPrivacyEntry>,
}

/// Emitted by the snapshot worker on the system stream; only the popularity
/// projector consumes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopularityRecalculated {
    pub feeds: Vec<SourceFeedId>,
    pub recalculated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LibraryEvent {
    UserSubscribed(UserSubscribed),
    UserUnsubscribed(UserUnsubscribed),
    PlayRecorded(PlayRecorded),
    PositionUpdated(PositionUpdated),
    EpisodeSaved(EpisodeSaved),
    EpisodeUnsaved(EpisodeUnsaved),
    EpisodeShared(EpisodeShared),
    PrivacyChanged(PrivacyChanged),
    EventsRemoved(EventsRemoved),
    PlaylistCreated(PlaylistCreated),
    PlaylistUpdated(PlaylistUpdated),
    PlaylistDeleted(PlaylistDeleted),
    PlaylistReordered(PlaylistReordered),
    PlaylistVisibilityChanged(PlaylistVisibilityChanged),
    CollectionCreated(CollectionCreated),
    CollectionUpdated(CollectionUpdated),
    CollectionDeleted(CollectionDeleted),
    CollectionVisibilityChanged(CollectionVisibilityChanged),
    FeedAddedToCollection(FeedAddedToCollection),
    FeedRemovedFromCollection(FeedRemovedFromCollection),
    CollectionFeedReordered(CollectionFeedReordered),
    UserCheckpoint(UserCheckpoint),
    PopularityRecalculated(PopularityRecalculated),
}

impl LibraryEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            LibraryEvent::UserSubscribed(_) => "UserSubscribed",
            LibraryEvent::UserUnsubscribed(_) => "UserUnsubscribed",
            LibraryEvent::PlayRecorded(_) => "PlayRecorded",
            LibraryEvent::PositionUpdated(_) => "PositionUpdated",
            LibraryEvent::EpisodeSaved(_) => "EpisodeSaved",
            LibraryEvent::EpisodeUnsaved(_) => "EpisodeUnsaved",
            LibraryEvent::EpisodeShared(_) => "EpisodeShared",
            LibraryEvent::PrivacyChanged(_) => "PrivacyChanged",
            LibraryEvent::EventsRemoved(_) => "EventsRemoved",
            LibraryEvent::PlaylistCreated(_) => "PlaylistCreated",
            LibraryEvent::PlaylistUpdated(_) => "PlaylistUpdated",
            LibraryEvent::PlaylistDeleted(_) => "PlaylistDeleted",
            LibraryEvent::PlaylistReordered(_) => "PlaylistReordered",
            LibraryEvent::PlaylistVisibilityChanged(_) => "PlaylistVisibilityChanged",
            LibraryEvent::CollectionCreated(_) => "CollectionCreated",
            LibraryEvent::CollectionUpdated(_) => "CollectionUpdated",
            LibraryEvent::CollectionDeleted(_) => "CollectionDeleted",
            LibraryEvent::CollectionVisibilityChanged(_) => "CollectionVisibilityChanged",
            LibraryEvent::FeedAddedToCollection(_) => "FeedAddedToCollection",
            LibraryEvent::FeedRemovedFromCollection(_) => "FeedRemovedFromCollection",
            LibraryEvent::CollectionFeedReordered(_) => "CollectionFeedReordered",
            LibraryEvent::UserCheckpoint(_) => "UserCheckpoint",
            LibraryEvent::PopularityRecalculated(_) => "PopularityRecalculated",
        }
    }

    pub fn to_payload(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    pub fn from_payload(payload: &serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(payload.clone())
    }
}

impl DomainEvent for LibraryEvent {
    fn event_type(&self) -> &'static str {
        LibraryEvent::event_type(self)
    }

    fn event_data(&self) -> Result<serde_json::Value, serde_json::Error> {
        self.to_payload()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn wire_format_carries_type_discriminator() {
        let event = LibraryEvent::EpisodeShared(EpisodeShared {
            feed: SourceFeedId::from_url("https://example.org/feed.xml"),
            item: SourceItemId::from_parts("g", "https://example.org/e.mp3"),
        });
        let payload = event.to_payload().unwrap();
        assert_eq!(payload["type"], json!("EpisodeShared"));
        assert_eq!(LibraryEvent::from_payload(&payload).unwrap(), event);
    }

    #[test]
    fn privacy_levels_use_lowercase_wire_names() {
        let event = LibraryEvent::PrivacyChanged(PrivacyChanged {
            privacy: PrivacySetting::Anonymous,
            feed: None,
            item: None,
        });
        let payload = event.to_payload().unwrap();
        assert_eq!(payload["privacy"], json!("anonymous"));
    }

    #[test]
    fn partial_checkpoint_payload_is_rejected() {
        // A checkpoint missing whole sections must fail to decode; silently
        // merging a partial snapshot would corrupt replay.
        let payload = json!({
            "type": "UserCheckpoint",
            "subscriptions": {},
            "play_statuses": {}
        });
        assert!(LibraryEvent::from_payload(&payload).is_err());
    }

    #[test]
    fn unknown_type_is_rejected() {
        let payload = json!({ "type": "SomethingElse" });
        assert!(LibraryEvent::from_payload(&payload).is_err());
    }
}
