use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub use podsync_types::{PrivacySetting, SourceFeedId, SourceItemId};

/// The aggregate key. Opaque string, a UUID in practice, but the engine
/// never assumes more than "non-empty string".
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Result<Self, String> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err("User id cannot be empty".to_string());
        }
        Ok(Self(id))
    }

    pub fn value(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlaylistId(Uuid);

impl PlaylistId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn from_string(id_str: &str) -> Result<Self, String> {
        Uuid::parse_str(id_str)
            .map(Self::from_uuid)
            .map_err(|_| "Invalid UUID format".to_string())
    }

    pub fn value(&self) -> Uuid {
        self.0
    }
}

impl Default for PlaylistId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PlaylistId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionId(Uuid);

impl CollectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn from_string(id_str: &str) -> Result<Self, String> {
        Uuid::parse_str(id_str)
            .map(Self::from_uuid)
            .map_err(|_| "Invalid UUID format".to_string())
    }

    pub fn value(&self) -> Uuid {
        self.0
    }
}

impl Default for CollectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlaylistName(String);

impl PlaylistName {
    pub fn new(name: impl Into<String>) -> Result<Self, String> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err("Playlist name cannot be empty".to_string());
        }
        if name.len() > 200 {
            return Err("Playlist name cannot exceed 200 characters".to_string());
        }
        Ok(Self(name.trim().to_string()))
    }

    pub fn value(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlaylistName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionTitle(String);

impl CollectionTitle {
    pub fn new(title: impl Into<String>) -> Result<Self, String> {
        let title = title.into();
        if title.trim().is_empty() {
            return Err("Collection title cannot be empty".to_string());
        }
        if title.len() > 200 {
            return Err("Collection title cannot exceed 200 characters".to_string());
        }
        Ok(Self(title.trim().to_string()))
    }

    pub fn value(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionTitle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn user_id_rejects_empty() {
        assert!(UserId::new("").is_err());
        assert!(UserId::new("   ").is_err());
        assert!(UserId::new("u1").is_ok());
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    #[case("\t\n")]
    fn playlist_name_rejects_blank(#[case] raw: &str) {
        assert!(PlaylistName::new(raw).is_err());
    }

    #[test]
    fn playlist_name_trims() {
        let name = PlaylistName::new("  Morning Commute  ").unwrap();
        assert_eq!(name.value(), "Morning Commute");
    }

    #[test]
    fn collection_title_rejects_oversized() {
        assert!(CollectionTitle::new("x".repeat(201)).is_err());
        assert!(CollectionTitle::new("Tech").is_ok());
    }

    #[test]
    fn ids_parse_from_string() {
        let id = PlaylistId::new();
        assert_eq!(PlaylistId::from_string(&id.to_string()).unwrap(), id);
        assert!(CollectionId::from_string("not-a-uuid").is_err());
    }
}
