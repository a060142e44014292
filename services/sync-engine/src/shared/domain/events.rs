use serde::{Deserialize, Serialize};

use podsync_types::{DeviceInfo, PrivacySetting};

/// Metadata copied verbatim from the command envelope into every event the
/// command produces. Only the recognized keys travel on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub privacy: Option<PrivacySetting>,
}

impl EventMetadata {
    pub fn from_device_info(infos: &DeviceInfo) -> Self {
        Self {
            device_id: infos.device_id.clone(),
            device_name: infos.device_name.clone(),
            privacy: infos.privacy,
        }
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Lenient on purpose: events recorded before a key existed (or with
    /// foreign keys in their metadata) decode to defaults.
    pub fn from_value(value: &serde_json::Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or_default()
    }
}

/// Anything the event store can append: a type tag plus a JSON payload.
pub trait DomainEvent: Send + Sync + std::fmt::Debug {
    fn event_type(&self) -> &'static str;
    fn event_data(&self) -> Result<serde_json::Value, serde_json::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_metadata_serializes_to_empty_object() {
        assert_eq!(EventMetadata::default().to_value(), json!({}));
    }

    #[test]
    fn metadata_round_trips_recognized_keys() {
        let metadata = EventMetadata {
            device_id: Some("dev-1".into()),
            device_name: Some("Phone".into()),
            privacy: Some(PrivacySetting::Anonymous),
        };
        let value = metadata.to_value();
        assert_eq!(value["privacy"], json!("anonymous"));
        assert_eq!(EventMetadata::from_value(&value), metadata);
    }

    #[test]
    fn unknown_or_partial_metadata_decodes_to_defaults() {
        let decoded = EventMetadata::from_value(&json!({ "device_id": "dev-2", "extra": 1 }));
        assert_eq!(decoded.device_id.as_deref(), Some("dev-2"));
        assert!(decoded.device_name.is_none());

        assert_eq!(
            EventMetadata::from_value(&json!("not an object")),
            EventMetadata::default()
        );
    }
}
