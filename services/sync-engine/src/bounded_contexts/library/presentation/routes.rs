use axum::extract::Request;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{delete, get, post, put};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use podsync_types::{DeviceInfo, PrivacySetting};

use super::handlers;
use crate::bounded_contexts::library::domain::value_objects::UserId;
use crate::shared::infrastructure::app_state::AppState;

/// The sync API. The authentication layer in front of this service validates
/// credentials and forwards the resolved user id as a bearer token; device
/// metadata rides along on its own headers and ends up in every event's
/// metadata.
pub fn create_sync_routes(state: AppState) -> Router {
    let api = Router::new()
        .route("/subscriptions", post(handlers::subscribe))
        .route("/subscriptions/unsubscribe", post(handlers::unsubscribe))
        .route("/plays", post(handlers::record_play))
        .route("/positions", put(handlers::update_position))
        .route("/episodes/save", post(handlers::save_episode))
        .route("/episodes/unsave", post(handlers::unsave_episode))
        .route("/episodes/share", post(handlers::share_episode))
        .route("/privacy", put(handlers::change_privacy))
        .route("/events/remove", post(handlers::remove_events))
        .route("/playlists", post(handlers::create_playlist))
        .route(
            "/playlists/:id",
            put(handlers::update_playlist).delete(handlers::delete_playlist),
        )
        .route("/playlists/:id/reorder", post(handlers::reorder_playlist))
        .route(
            "/playlists/:id/visibility",
            put(handlers::change_playlist_visibility),
        )
        .route("/collections", post(handlers::create_collection))
        .route(
            "/collections/:id",
            put(handlers::update_collection).delete(handlers::delete_collection),
        )
        .route(
            "/collections/:id/visibility",
            put(handlers::change_collection_visibility),
        )
        .route(
            "/collections/:id/feeds",
            post(handlers::add_feed_to_collection),
        )
        .route(
            "/collections/:id/feeds/remove",
            delete(handlers::remove_feed_from_collection),
        )
        .route(
            "/collections/:id/feeds/reorder",
            post(handlers::reorder_collection_feed),
        )
        .route("/sync", post(handlers::sync_user_data))
        .layer(middleware::from_fn(identity_middleware));

    Router::new()
        .route("/health", get(handlers::health))
        .merge(api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Require the upstream-resolved bearer identity; attach device metadata.
async fn identity_middleware(mut req: Request, next: Next) -> Result<Response, StatusCode> {
    let user_id = bearer_user_id(req.headers()).ok_or(StatusCode::UNAUTHORIZED)?;
    let infos = device_info_from_headers(req.headers());

    req.extensions_mut().insert(user_id);
    req.extensions_mut().insert(infos);
    Ok(next.run(req).await)
}

fn bearer_user_id(headers: &HeaderMap) -> Option<UserId> {
    headers
        .get("Authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .and_then(|token| UserId::new(token).ok())
}

fn device_info_from_headers(headers: &HeaderMap) -> DeviceInfo {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string())
    };
    DeviceInfo {
        device_id: header("x-device-id"),
        device_name: header("x-device-name"),
        privacy: header("x-privacy").and_then(|value| PrivacySetting::from_str(&value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_token_resolves_to_user_id() {
        let mut headers = HeaderMap::new();
        headers.insert("Authorization", "Bearer u-42".parse().unwrap());
        assert_eq!(bearer_user_id(&headers).unwrap().value(), "u-42");
    }

    #[test]
    fn missing_or_malformed_authorization_is_rejected() {
        assert!(bearer_user_id(&HeaderMap::new()).is_none());

        let mut headers = HeaderMap::new();
        headers.insert("Authorization", "Basic dXNlcjpwdw==".parse().unwrap());
        assert!(bearer_user_id(&headers).is_none());

        let mut headers = HeaderMap::new();
        headers.insert("Authorization", "Bearer ".parse().unwrap());
        assert!(bearer_user_id(&headers).is_none());
    }

    #[test]
    fn device_info_reads_recognized_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-device-id", "dev-1".parse().unwrap());
        headers.insert("x-device-name", "Phone".parse().unwrap());
        headers.insert("x-privacy", "anonymous".parse().unwrap());

        let infos = device_info_from_headers(&headers);
        assert_eq!(infos.device_id.as_deref(), Some("dev-1"));
        assert_eq!(infos.device_name.as_deref(), Some("Phone"));
        assert_eq!(infos.privacy, Some(PrivacySetting::Anonymous));
    }

    #[test]
    fn unknown_privacy_header_is_dropped() {
        let mut headers = HeaderMap::new();
        headers.insert("x-privacy", "sneaky".parse().unwrap());
        assert!(device_info_from_headers(&headers).privacy.is_none());
    }
}
