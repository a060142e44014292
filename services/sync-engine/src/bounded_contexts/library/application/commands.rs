use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use podsync_types::{DeviceInfo, SyncUpload};

use crate::bounded_contexts::library::domain::value_objects::{
    CollectionId, PlaylistId, PrivacySetting, SourceFeedId, SourceItemId, UserId,
};
use crate::shared::application::command::Command;
use crate::shared::domain::events::EventMetadata;

/// Everything a client (or a system job) can ask the write path to do.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LibraryCommand {
    Subscribe {
        feed: SourceFeedId,
    },
    Unsubscribe {
        feed: SourceFeedId,
    },
    RecordPlay {
        feed: SourceFeedId,
        item: SourceItemId,
        position: i64,
        played: bool,
        timestamp: Option<DateTime<Utc>>,
    },
    UpdatePosition {
        feed: SourceFeedId,
        item: SourceItemId,
        position: i64,
        timestamp: Option<DateTime<Utc>>,
    },
    SaveEpisode {
        playlist_id: Option<PlaylistId>,
        feed: SourceFeedId,
        item: SourceItemId,
        item_title: Option<String>,
        feed_title: Option<String>,
    },
    UnsaveEpisode {
        playlist_id: PlaylistId,
        feed: SourceFeedId,
        item: SourceItemId,
    },
    ShareEpisode {
        feed: SourceFeedId,
        item: SourceItemId,
    },
    ChangePrivacy {
        privacy: PrivacySetting,
        feed: Option<SourceFeedId>,
        item: Option<SourceItemId>,
    },
    RemoveEvents {
        feed: Option<SourceFeedId>,
        item: Option<SourceItemId>,
    },
    CreatePlaylist {
        playlist_id: Option<PlaylistId>,
        name: String,
        description: Option<String>,
        is_public: bool,
    },
    UpdatePlaylist {
        playlist_id: PlaylistId,
        name: Option<String>,
        description: Option<String>,
    },
    DeletePlaylist {
        playlist_id: PlaylistId,
    },
    ReorderPlaylist {
        playlist_id: PlaylistId,
        feed: SourceFeedId,
        item: SourceItemId,
        new_position: usize,
    },
    ChangePlaylistVisibility {
        playlist_id: PlaylistId,
        is_public: bool,
    },
    CreateCollection {
        collection_id: Option<CollectionId>,
        title: String,
        description: Option<String>,
        color: Option<String>,
        is_default: bool,
        is_public: bool,
    },
    UpdateCollection {
        collection_id: CollectionId,
        title: Option<String>,
        description: Option<String>,
        color: Option<String>,
    },
    DeleteCollection {
        collection_id: CollectionId,
    },
    ChangeCollectionVisibility {
        collection_id: CollectionId,
        is_public: bool,
    },
    AddFeedToCollection {
        collection_id: CollectionId,
        feed: SourceFeedId,
    },
    RemoveFeedFromCollection {
        collection_id: CollectionId,
        feed: SourceFeedId,
    },
    ReorderCollectionFeed {
        collection_id: CollectionId,
        feed: SourceFeedId,
        new_position: usize,
    },
    /// System command issued by the snapshot worker.
    Snapshot,
    /// System command: converge a device's uploaded library by diffing.
    SyncUserData {
        upload: SyncUpload,
    },
}

impl LibraryCommand {
    pub fn name(&self) -> &'static str {
        match self {
            LibraryCommand::Subscribe { .. } => "subscribe",
            LibraryCommand::Unsubscribe { .. } => "unsubscribe",
            LibraryCommand::RecordPlay { .. } => "record_play",
            LibraryCommand::UpdatePosition { .. } => "update_position",
            LibraryCommand::SaveEpisode { .. } => "save_episode",
            LibraryCommand::UnsaveEpisode { .. } => "unsave_episode",
            LibraryCommand::ShareEpisode { .. } => "share_episode",
            LibraryCommand::ChangePrivacy { .. } => "change_privacy",
            LibraryCommand::RemoveEvents { .. } => "remove_events",
            LibraryCommand::CreatePlaylist { .. } => "create_playlist",
            LibraryCommand::UpdatePlaylist { .. } => "update_playlist",
            LibraryCommand::DeletePlaylist { .. } => "delete_playlist",
            LibraryCommand::ReorderPlaylist { .. } => "reorder_playlist",
            LibraryCommand::ChangePlaylistVisibility { .. } => "change_playlist_visibility",
            LibraryCommand::CreateCollection { .. } => "create_collection",
            LibraryCommand::UpdateCollection { .. } => "update_collection",
            LibraryCommand::DeleteCollection { .. } => "delete_collection",
            LibraryCommand::ChangeCollectionVisibility { .. } => "change_collection_visibility",
            LibraryCommand::AddFeedToCollection { .. } => "add_feed_to_collection",
            LibraryCommand::RemoveFeedFromCollection { .. } => "remove_feed_from_collection",
            LibraryCommand::ReorderCollectionFeed { .. } => "reorder_collection_feed",
            LibraryCommand::Snapshot => "snapshot",
            LibraryCommand::SyncUserData { .. } => "sync_user_data",
        }
    }
}

/// Wire-neutral envelope: the aggregate key plus optional device metadata
/// that is copied verbatim into every resulting event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub user_id: UserId,
    pub command: LibraryCommand,
    #[serde(default)]
    pub event_infos: DeviceInfo,
}

impl CommandEnvelope {
    pub fn new(user_id: UserId, command: LibraryCommand) -> Self {
        Self {
            user_id,
            command,
            event_infos: DeviceInfo::default(),
        }
    }

    pub fn with_event_infos(mut self, event_infos: DeviceInfo) -> Self {
        self.event_infos = event_infos;
        self
    }

    pub fn metadata(&self) -> serde_json::Value {
        EventMetadata::from_device_info(&self.event_infos).to_value()
    }
}

impl Command for CommandEnvelope {}

#[cfg(test)]
mod tests {
    use super::*;
    use podsync_types::PrivacySetting as WirePrivacy;

    #[test]
    fn metadata_carries_recognized_keys_only_when_set() {
        let envelope = CommandEnvelope::new(
            UserId::new("u1").unwrap(),
            LibraryCommand::Subscribe {
                feed: SourceFeedId::from_url("https://example.org/f.xml"),
            },
        );
        assert_eq!(envelope.metadata(), serde_json::json!({}));

        let envelope = envelope.with_event_infos(DeviceInfo {
            device_id: Some("dev-1".into()),
            device_name: Some("Kitchen speaker".into()),
            privacy: Some(WirePrivacy::Anonymous),
        });
        let metadata = envelope.metadata();
        assert_eq!(metadata["device_id"], "dev-1");
        assert_eq!(metadata["privacy"], "anonymous");
    }
}
