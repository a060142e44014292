use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identificador opaco de un feed RSS: base64 de la URL del feed.
///
/// The engine treats it as an opaque key; decoding back to the URL is a
/// convenience for the enrichment side.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceFeedId(String);

impl SourceFeedId {
    pub fn from_encoded(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    pub fn from_url(url: &str) -> Self {
        Self(BASE64.encode(url.as_bytes()))
    }

    pub fn value(&self) -> &str {
        &self.0
    }

    pub fn decode_url(&self) -> Result<String, base64::DecodeError> {
        let bytes = BASE64.decode(self.0.as_bytes())?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl fmt::Display for SourceFeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identificador opaco de un episodio: base64 de `"<guid>,<enclosure_url>"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceItemId(String);

impl SourceItemId {
    pub fn from_encoded(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    pub fn from_parts(guid: &str, enclosure_url: &str) -> Self {
        Self(BASE64.encode(format!("{},{}", guid, enclosure_url).as_bytes()))
    }

    pub fn value(&self) -> &str {
        &self.0
    }

    /// Splits the decoded key back into `(guid, enclosure_url)`.
    pub fn decode_parts(&self) -> Result<(String, String), base64::DecodeError> {
        let bytes = BASE64.decode(self.0.as_bytes())?;
        let decoded = String::from_utf8_lossy(&bytes).into_owned();
        match decoded.split_once(',') {
            Some((guid, url)) => Ok((guid.to_string(), url.to_string())),
            None => Ok((decoded, String::new())),
        }
    }
}

impl fmt::Display for SourceItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feed_id_round_trips_url() {
        let id = SourceFeedId::from_url("https://example.org/feed.xml");
        assert_eq!(id.decode_url().unwrap(), "https://example.org/feed.xml");
    }

    #[test]
    fn item_id_round_trips_guid_and_enclosure() {
        let id = SourceItemId::from_parts("ep-42", "https://example.org/ep42.mp3");
        let (guid, url) = id.decode_parts().unwrap();
        assert_eq!(guid, "ep-42");
        assert_eq!(url, "https://example.org/ep42.mp3");
    }

    #[test]
    fn item_id_without_separator_keeps_guid_only() {
        let id = SourceItemId::from_encoded(BASE64.encode("bare-guid"));
        let (guid, url) = id.decode_parts().unwrap();
        assert_eq!(guid, "bare-guid");
        assert!(url.is_empty());
    }
}
