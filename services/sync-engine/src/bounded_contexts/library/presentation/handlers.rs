use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use serde_json::json;

use podsync_types::{DeviceInfo, PrivacySetting, SourceFeedId, SourceItemId, SyncUpload};

use crate::bounded_contexts::library::application::commands::{CommandEnvelope, LibraryCommand};
use crate::bounded_contexts::library::application::dispatcher::DispatchError;
use crate::bounded_contexts::library::application::runtime::ExecutionOutcome;
use crate::bounded_contexts::library::domain::errors::LibraryError;
use crate::bounded_contexts::library::domain::value_objects::{CollectionId, PlaylistId, UserId};
use crate::bounded_contexts::library::infrastructure::rate_limiter::RateLimitDecision;
use crate::shared::application::command::CommandHandler;
use crate::shared::infrastructure::app_state::AppState;
use crate::shared::infrastructure::database::postgres::health_check;

#[derive(Debug, Serialize)]
pub struct DispatchResponse {
    pub stream_version: i64,
    pub events: Vec<String>,
}

impl From<ExecutionOutcome> for DispatchResponse {
    fn from(outcome: ExecutionOutcome) -> Self {
        Self {
            stream_version: outcome.stream_version,
            events: outcome.event_types,
        }
    }
}

fn error_response(err: DispatchError) -> Response {
    let status = match &err {
        DispatchError::Validation(inner) => match inner {
            LibraryError::PlaylistNotFound | LibraryError::CollectionNotFound => {
                StatusCode::NOT_FOUND
            }
            LibraryError::PlaylistAlreadyExists
            | LibraryError::DefaultCollectionAlreadyExists => StatusCode::CONFLICT,
            _ => StatusCode::BAD_REQUEST,
        },
        DispatchError::VersionConflict => StatusCode::CONFLICT,
        DispatchError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        DispatchError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        DispatchError::StreamPoisoned => StatusCode::SERVICE_UNAVAILABLE,
        DispatchError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    let body = json!({
        "error": err.code(),
        "message": err.to_string(),
        "retryable": err.is_retryable(),
    });
    (status, Json(body)).into_response()
}

async fn dispatch(
    state: &AppState,
    user_id: UserId,
    event_infos: DeviceInfo,
    command: LibraryCommand,
) -> Response {
    let envelope = CommandEnvelope::new(user_id, command).with_event_infos(event_infos);
    match state.dispatcher.handle(envelope).await {
        Ok(outcome) => (StatusCode::OK, Json(DispatchResponse::from(outcome))).into_response(),
        Err(err) => error_response(err),
    }
}

// ---------------------------------------------------------------------
// Subscriptions
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct FeedRequest {
    pub feed: SourceFeedId,
}

pub async fn subscribe(
    State(state): State<AppState>,
    Extension(user_id): Extension<UserId>,
    Extension(infos): Extension<DeviceInfo>,
    Json(body): Json<FeedRequest>,
) -> Response {
    dispatch(&state, user_id, infos, LibraryCommand::Subscribe { feed: body.feed }).await
}

pub async fn unsubscribe(
    State(state): State<AppState>,
    Extension(user_id): Extension<UserId>,
    Extension(infos): Extension<DeviceInfo>,
    Json(body): Json<FeedRequest>,
) -> Response {
    dispatch(&state, user_id, infos, LibraryCommand::Unsubscribe { feed: body.feed }).await
}

// ---------------------------------------------------------------------
// Plays and positions
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct RecordPlayRequest {
    pub feed: SourceFeedId,
    pub item: SourceItemId,
    pub position: i64,
    #[serde(default)]
    pub played: bool,
    pub timestamp: Option<chrono::DateTime<chrono::Utc>>,
}

pub async fn record_play(
    State(state): State<AppState>,
    Extension(user_id): Extension<UserId>,
    Extension(infos): Extension<DeviceInfo>,
    Json(body): Json<RecordPlayRequest>,
) -> Response {
    // Ingress shaping happens here, before any aggregate work.
    if state.rate_limiter.check(user_id.value()).await == RateLimitDecision::RateLimited {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "error": "rate_limited", "retryable": true })),
        )
            .into_response();
    }
    dispatch(
        &state,
        user_id,
        infos,
        LibraryCommand::RecordPlay {
            feed: body.feed,
            item: body.item,
            position: body.position,
            played: body.played,
            timestamp: body.timestamp,
        },
    )
    .await
}

#[derive(Debug, Deserialize)]
pub struct UpdatePositionRequest {
    pub feed: SourceFeedId,
    pub item: SourceItemId,
    pub position: i64,
    pub timestamp: Option<chrono::DateTime<chrono::Utc>>,
}

pub async fn update_position(
    State(state): State<AppState>,
    Extension(user_id): Extension<UserId>,
    Extension(infos): Extension<DeviceInfo>,
    Json(body): Json<UpdatePositionRequest>,
) -> Response {
    dispatch(
        &state,
        user_id,
        infos,
        LibraryCommand::UpdatePosition {
            feed: body.feed,
            item: body.item,
            position: body.position,
            timestamp: body.timestamp,
        },
    )
    .await
}

// ---------------------------------------------------------------------
// Saved and shared episodes
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct SaveEpisodeRequest {
    pub playlist_id: Option<PlaylistId>,
    pub feed: SourceFeedId,
    pub item: SourceItemId,
    pub item_title: Option<String>,
    pub feed_title: Option<String>,
}

pub async fn save_episode(
    State(state): State<AppState>,
    Extension(user_id): Extension<UserId>,
    Extension(infos): Extension<DeviceInfo>,
    Json(body): Json<SaveEpisodeRequest>,
) -> Response {
    dispatch(
        &state,
        user_id,
        infos,
        LibraryCommand::SaveEpisode {
            playlist_id: body.playlist_id,
            feed: body.feed,
            item: body.item,
            item_title: body.item_title,
            feed_title: body.feed_title,
        },
    )
    .await
}

#[derive(Debug, Deserialize)]
pub struct UnsaveEpisodeRequest {
    pub playlist_id: PlaylistId,
    pub feed: SourceFeedId,
    pub item: SourceItemId,
}

pub async fn unsave_episode(
    State(state): State<AppState>,
    Extension(user_id): Extension<UserId>,
    Extension(infos): Extension<DeviceInfo>,
    Json(body): Json<UnsaveEpisodeRequest>,
) -> Response {
    dispatch(
        &state,
        user_id,
        infos,
        LibraryCommand::UnsaveEpisode {
            playlist_id: body.playlist_id,
            feed: body.feed,
            item: body.item,
        },
    )
    .await
}

#[derive(Debug, Deserialize)]
pub struct ShareEpisodeRequest {
    pub feed: SourceFeedId,
    pub item: SourceItemId,
}

pub async fn share_episode(
    State(state): State<AppState>,
    Extension(user_id): Extension<UserId>,
    Extension(infos): Extension<DeviceInfo>,
    Json(body): Json<ShareEpisodeRequest>,
) -> Response {
    dispatch(
        &state,
        user_id,
        infos,
        LibraryCommand::ShareEpisode {
            feed: body.feed,
            item: body.item,
        },
    )
    .await
}

// ---------------------------------------------------------------------
// Privacy
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ChangePrivacyRequest {
    pub privacy: PrivacySetting,
    pub feed: Option<SourceFeedId>,
    pub item: Option<SourceItemId>,
}

pub async fn change_privacy(
    State(state): State<AppState>,
    Extension(user_id): Extension<UserId>,
    Extension(infos): Extension<DeviceInfo>,
    Json(body): Json<ChangePrivacyRequest>,
) -> Response {
    dispatch(
        &state,
        user_id,
        infos,
        LibraryCommand::ChangePrivacy {
            privacy: body.privacy,
            feed: body.feed,
            item: body.item,
        },
    )
    .await
}

#[derive(Debug, Deserialize)]
pub struct RemoveEventsRequest {
    pub feed: Option<SourceFeedId>,
    pub item: Option<SourceItemId>,
}

pub async fn remove_events(
    State(state): State<AppState>,
    Extension(user_id): Extension<UserId>,
    Extension(infos): Extension<DeviceInfo>,
    Json(body): Json<RemoveEventsRequest>,
) -> Response {
    dispatch(
        &state,
        user_id,
        infos,
        LibraryCommand::RemoveEvents {
            feed: body.feed,
            item: body.item,
        },
    )
    .await
}

// ---------------------------------------------------------------------
// Playlists
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreatePlaylistRequest {
    pub playlist_id: Option<PlaylistId>,
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub is_public: bool,
}

pub async fn create_playlist(
    State(state): State<AppState>,
    Extension(user_id): Extension<UserId>,
    Extension(infos): Extension<DeviceInfo>,
    Json(body): Json<CreatePlaylistRequest>,
) -> Response {
    dispatch(
        &state,
        user_id,
        infos,
        LibraryCommand::CreatePlaylist {
            playlist_id: body.playlist_id,
            name: body.name,
            description: body.description,
            is_public: body.is_public,
        },
    )
    .await
}

#[derive(Debug, Deserialize)]
pub struct UpdatePlaylistRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

pub async fn update_playlist(
    State(state): State<AppState>,
    Extension(user_id): Extension<UserId>,
    Extension(infos): Extension<DeviceInfo>,
    Path(playlist_id): Path<PlaylistId>,
    Json(body): Json<UpdatePlaylistRequest>,
) -> Response {
    dispatch(
        &state,
        user_id,
        infos,
        LibraryCommand::UpdatePlaylist {
            playlist_id,
            name: body.name,
            description: body.description,
        },
    )
    .await
}

pub async fn delete_playlist(
    State(state): State<AppState>,
    Extension(user_id): Extension<UserId>,
    Extension(infos): Extension<DeviceInfo>,
    Path(playlist_id): Path<PlaylistId>,
) -> Response {
    dispatch(&state, user_id, infos, LibraryCommand::DeletePlaylist { playlist_id }).await
}

#[derive(Debug, Deserialize)]
pub struct ReorderPlaylistRequest {
    pub feed: SourceFeedId,
    pub item: SourceItemId,
    pub new_position: usize,
}

pub async fn reorder_playlist(
    State(state): State<AppState>,
    Extension(user_id): Extension<UserId>,
    Extension(infos): Extension<DeviceInfo>,
    Path(playlist_id): Path<PlaylistId>,
    Json(body): Json<ReorderPlaylistRequest>,
) -> Response {
    dispatch(
        &state,
        user_id,
        infos,
        LibraryCommand::ReorderPlaylist {
            playlist_id,
            feed: body.feed,
            item: body.item,
            new_position: body.new_position,
        },
    )
    .await
}

#[derive(Debug, Deserialize)]
pub struct VisibilityRequest {
    pub is_public: bool,
}

pub async fn change_playlist_visibility(
    State(state): State<AppState>,
    Extension(user_id): Extension<UserId>,
    Extension(infos): Extension<DeviceInfo>,
    Path(playlist_id): Path<PlaylistId>,
    Json(body): Json<VisibilityRequest>,
) -> Response {
    dispatch(
        &state,
        user_id,
        infos,
        LibraryCommand::ChangePlaylistVisibility {
            playlist_id,
            is_public: body.is_public,
        },
    )
    .await
}

// ---------------------------------------------------------------------
// Collections
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateCollectionRequest {
    pub collection_id: Option<CollectionId>,
    pub title: String,
    pub description: Option<String>,
    pub color: Option<String>,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub is_public: bool,
}

pub async fn create_collection(
    State(state): State<AppState>,
    Extension(user_id): Extension<UserId>,
    Extension(infos): Extension<DeviceInfo>,
    Json(body): Json<CreateCollectionRequest>,
) -> Response {
    dispatch(
        &state,
        user_id,
        infos,
        LibraryCommand::CreateCollection {
            collection_id: body.collection_id,
            title: body.title,
            description: body.description,
            color: body.color,
            is_default: body.is_default,
            is_public: body.is_public,
        },
    )
    .await
}

#[derive(Debug, Deserialize)]
pub struct UpdateCollectionRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub color: Option<String>,
}

pub async fn update_collection(
    State(state): State<AppState>,
    Extension(user_id): Extension<UserId>,
    Extension(infos): Extension<DeviceInfo>,
    Path(collection_id): Path<CollectionId>,
    Json(body): Json<UpdateCollectionRequest>,
) -> Response {
    dispatch(
        &state,
        user_id,
        infos,
        LibraryCommand::UpdateCollection {
            collection_id,
            title: body.title,
            description: body.description,
            color: body.color,
        },
    )
    .await
}

pub async fn delete_collection(
    State(state): State<AppState>,
    Extension(user_id): Extension<UserId>,
    Extension(infos): Extension<DeviceInfo>,
    Path(collection_id): Path<CollectionId>,
) -> Response {
    dispatch(&state, user_id, infos, LibraryCommand::DeleteCollection { collection_id }).await
}

pub async fn change_collection_visibility(
    State(state): State<AppState>,
    Extension(user_id): Extension<UserId>,
    Extension(infos): Extension<DeviceInfo>,
    Path(collection_id): Path<CollectionId>,
    Json(body): Json<VisibilityRequest>,
) -> Response {
    dispatch(
        &state,
        user_id,
        infos,
        LibraryCommand::ChangeCollectionVisibility {
            collection_id,
            is_public: body.is_public,
        },
    )
    .await
}

pub async fn add_feed_to_collection(
    State(state): State<AppState>,
    Extension(user_id): Extension<UserId>,
    Extension(infos): Extension<DeviceInfo>,
    Path(collection_id): Path<CollectionId>,
    Json(body): Json<FeedRequest>,
) -> Response {
    dispatch(
        &state,
        user_id,
        infos,
        LibraryCommand::AddFeedToCollection {
            collection_id,
            feed: body.feed,
        },
    )
    .await
}

pub async fn remove_feed_from_collection(
    State(state): State<AppState>,
    Extension(user_id): Extension<UserId>,
    Extension(infos): Extension<DeviceInfo>,
    Path(collection_id): Path<CollectionId>,
    Json(body): Json<FeedRequest>,
) -> Response {
    dispatch(
        &state,
        user_id,
        infos,
        LibraryCommand::RemoveFeedFromCollection {
            collection_id,
            feed: body.feed,
        },
    )
    .await
}

#[derive(Debug, Deserialize)]
pub struct ReorderCollectionFeedRequest {
    pub feed: SourceFeedId,
    pub new_position: usize,
}

pub async fn reorder_collection_feed(
    State(state): State<AppState>,
    Extension(user_id): Extension<UserId>,
    Extension(infos): Extension<DeviceInfo>,
    Path(collection_id): Path<CollectionId>,
    Json(body): Json<ReorderCollectionFeedRequest>,
) -> Response {
    dispatch(
        &state,
        user_id,
        infos,
        LibraryCommand::ReorderCollectionFeed {
            collection_id,
            feed: body.feed,
            new_position: body.new_position,
        },
    )
    .await
}

// ---------------------------------------------------------------------
// Bulk sync and health
// ---------------------------------------------------------------------

pub async fn sync_user_data(
    State(state): State<AppState>,
    Extension(user_id): Extension<UserId>,
    Extension(infos): Extension<DeviceInfo>,
    Json(upload): Json<SyncUpload>,
) -> Response {
    dispatch(&state, user_id, infos, LibraryCommand::SyncUserData { upload }).await
}

pub async fn health(State(state): State<AppState>) -> Response {
    match health_check(&state.pool).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "healthy" }))).into_response(),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "unhealthy", "detail": err.to_string() })),
        )
            .into_response(),
    }
}
