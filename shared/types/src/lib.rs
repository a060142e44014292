pub mod errors;
pub mod models;
pub mod source_ids;

// Re-exports principales
pub use errors::*;
pub use models::{
    DeviceInfo, PlayStatusUpload, PrivacySetting, SubscriptionUpload, SyncUpload,
};
pub use source_ids::{SourceFeedId, SourceItemId};
