use async_trait::async_trait;

use super::{decode_event, PgTx, Projection, ProjectionError};
use crate::bounded_contexts::library::domain::aggregates::IMPLICIT_SAVES_PLAYLIST;
use crate::bounded_contexts::library::domain::events::LibraryEvent;
use crate::bounded_contexts::library::infrastructure::event_store::RecordedEvent;

/// Maintains `playlists` and `playlist_items`. Playlists are soft-deleted
/// via `deleted_at`; items are hard rows keyed `(playlist_id, feed, item)`.
/// All timestamps come from the event, so two replays from scratch produce
/// identical tables.
pub struct PlaylistsProjection;

#[async_trait]
impl Projection for PlaylistsProjection {
    fn name(&self) -> &'static str {
        "playlists"
    }

    async fn apply(
        &self,
        tx: &mut PgTx<'_>,
        recorded: &RecordedEvent,
    ) -> Result<(), ProjectionError> {
        match decode_event(recorded)? {
            LibraryEvent::PlaylistCreated(event) => {
                sqlx::query(
                    r#"INSERT INTO playlists (id, user_id, name, description, is_public, created_at, updated_at, deleted_at)
                       VALUES ($1, $2, $3, $4, $5, $6, $6, NULL)
                       ON CONFLICT (id) DO UPDATE SET
                       name = EXCLUDED.name,
                       description = EXCLUDED.description,
                       is_public = EXCLUDED.is_public,
                       updated_at = EXCLUDED.updated_at,
                       deleted_at = NULL"#,
                )
                .bind(event.playlist_id.value())
                .bind(&recorded.stream_id)
                .bind(&event.name)
                .bind(&event.description)
                .bind(event.is_public)
                .bind(recorded.recorded_at)
                .execute(&mut **tx)
                .await?;
            }
            LibraryEvent::PlaylistUpdated(event) => {
                sqlx::query(
                    r#"UPDATE playlists SET
                       name = COALESCE($2, name),
                       description = COALESCE($3, description),
                       updated_at = $4
                       WHERE id = $1"#,
                )
                .bind(event.playlist_id.value())
                .bind(&event.name)
                .bind(&event.description)
                .bind(recorded.recorded_at)
                .execute(&mut **tx)
                .await?;
            }
            LibraryEvent::PlaylistDeleted(event) => {
                sqlx::query("UPDATE playlists SET deleted_at = $2 WHERE id = $1")
                    .bind(event.playlist_id.value())
                    .bind(recorded.recorded_at)
                    .execute(&mut **tx)
                    .await?;
            }
            LibraryEvent::PlaylistVisibilityChanged(event) => {
                sqlx::query(
                    "UPDATE playlists SET is_public = $2, updated_at = $3 WHERE id = $1",
                )
                .bind(event.playlist_id.value())
                .bind(event.is_public)
                .bind(recorded.recorded_at)
                .execute(&mut **tx)
                .await?;
            }
            LibraryEvent::EpisodeSaved(event) => {
                // A save may target a playlist the user never explicitly
                // created; materialize it so the item has a home.
                sqlx::query(
                    r#"INSERT INTO playlists (id, user_id, name, description, is_public, created_at, updated_at, deleted_at)
                       VALUES ($1, $2, $3, NULL, FALSE, $4, $4, NULL)
                       ON CONFLICT (id) DO NOTHING"#,
                )
                .bind(event.playlist_id.value())
                .bind(&recorded.stream_id)
                .bind(IMPLICIT_SAVES_PLAYLIST)
                .bind(recorded.recorded_at)
                .execute(&mut **tx)
                .await?;

                sqlx::query(
                    r#"INSERT INTO playlist_items (playlist_id, user_id, feed, item, item_title, feed_title, position, added_at)
                       VALUES ($1, $2, $3, $4, $5, $6,
                               COALESCE((SELECT MAX(position) + 1 FROM playlist_items WHERE playlist_id = $1), 0),
                               $7)
                       ON CONFLICT (playlist_id, feed, item) DO NOTHING"#,
                )
                .bind(event.playlist_id.value())
                .bind(&recorded.stream_id)
                .bind(event.feed.value())
                .bind(event.item.value())
                .bind(&event.item_title)
                .bind(&event.feed_title)
                .bind(recorded.recorded_at)
                .execute(&mut **tx)
                .await?;
            }
            LibraryEvent::EpisodeUnsaved(event) => {
                sqlx::query(
                    "DELETE FROM playlist_items WHERE playlist_id = $1 AND feed = $2 AND item = $3",
                )
                .bind(event.playlist_id.value())
                .bind(event.feed.value())
                .bind(event.item.value())
                .execute(&mut **tx)
                .await?;
            }
            LibraryEvent::PlaylistReordered(event) => {
                for (index, entry) in event.item_order.iter().enumerate() {
                    sqlx::query(
                        r#"UPDATE playlist_items SET position = $4
                           WHERE playlist_id = $1 AND feed = $2 AND item = $3"#,
                    )
                    .bind(event.playlist_id.value())
                    .bind(entry.feed.value())
                    .bind(entry.item.value())
                    .bind(index as i64)
                    .execute(&mut **tx)
                    .await?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}
