use thiserror::Error;

/// Validation failures a command can produce. Each maps to the stable
/// lower_snake reason code clients program against.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LibraryError {
    #[error("user is not subscribed to this feed")]
    NotSubscribed,

    #[error("feed is not subscribed")]
    FeedNotSubscribed,

    #[error("position is out of range")]
    InvalidPosition,

    #[error("episode is not saved")]
    EpisodeNotSaved,

    #[error("a non-empty name is required")]
    NameRequired,

    #[error("playlist already exists")]
    PlaylistAlreadyExists,

    #[error("playlist not found")]
    PlaylistNotFound,

    #[error("collection not found")]
    CollectionNotFound,

    #[error("the default collection cannot be deleted")]
    CannotDeleteDefaultCollection,

    #[error("a default collection already exists")]
    DefaultCollectionAlreadyExists,

    #[error("feed is not part of this collection")]
    FeedNotInCollection,
}

impl LibraryError {
    pub fn code(&self) -> &'static str {
        match self {
            LibraryError::NotSubscribed => "not_subscribed",
            LibraryError::FeedNotSubscribed => "feed_not_subscribed",
            LibraryError::InvalidPosition => "invalid_position",
            LibraryError::EpisodeNotSaved => "episode_not_saved",
            LibraryError::NameRequired => "name_required",
            LibraryError::PlaylistAlreadyExists => "playlist_already_exists",
            LibraryError::PlaylistNotFound => "playlist_not_found",
            LibraryError::CollectionNotFound => "collection_not_found",
            LibraryError::CannotDeleteDefaultCollection => "cannot_delete_default_collection",
            LibraryError::DefaultCollectionAlreadyExists => "default_collection_already_exists",
            LibraryError::FeedNotInCollection => "feed_not_in_collection",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_lower_snake_and_stable() {
        let all = [
            LibraryError::NotSubscribed,
            LibraryError::FeedNotSubscribed,
            LibraryError::InvalidPosition,
            LibraryError::EpisodeNotSaved,
            LibraryError::NameRequired,
            LibraryError::PlaylistAlreadyExists,
            LibraryError::PlaylistNotFound,
            LibraryError::CollectionNotFound,
            LibraryError::CannotDeleteDefaultCollection,
            LibraryError::DefaultCollectionAlreadyExists,
            LibraryError::FeedNotInCollection,
        ];
        for err in all {
            let code = err.code();
            assert!(!code.is_empty());
            assert!(code
                .chars()
                .all(|c| c.is_ascii_lowercase() || c == '_'));
        }
    }
}
