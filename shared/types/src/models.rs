use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::source_ids::{SourceFeedId, SourceItemId};

/// Device metadata a client attaches to every command it sends.
/// Copied verbatim into each resulting event's metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub privacy: Option<PrivacySetting>,
}

impl DeviceInfo {
    pub fn is_empty(&self) -> bool {
        self.device_id.is_none() && self.device_name.is_none() && self.privacy.is_none()
    }
}

/// Privacy levels as they travel on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrivacySetting {
    Public,
    Anonymous,
    Private,
}

impl PrivacySetting {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrivacySetting::Public => "public",
            PrivacySetting::Anonymous => "anonymous",
            PrivacySetting::Private => "private",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "public" => Some(PrivacySetting::Public),
            "anonymous" => Some(PrivacySetting::Anonymous),
            "private" => Some(PrivacySetting::Private),
            _ => None,
        }
    }
}

// Bulk sync upload: a device posts its local library and the engine
// converges the server-side state by diffing.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionUpload {
    pub feed: SourceFeedId,
    pub subscribed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayStatusUpload {
    pub feed: SourceFeedId,
    pub item: SourceItemId,
    pub position: i64,
    pub played: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncUpload {
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionUpload>,
    #[serde(default)]
    pub play_statuses: Vec<PlayStatusUpload>,
}
