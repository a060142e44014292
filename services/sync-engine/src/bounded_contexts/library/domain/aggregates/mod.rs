pub mod user_library;

pub use user_library::{
    Collection, Playlist, PlaylistItem, PlayStatus, Subscription, UserLibrary,
    DEFAULT_COLLECTION_TITLE, IMPLICIT_SAVES_PLAYLIST,
};
