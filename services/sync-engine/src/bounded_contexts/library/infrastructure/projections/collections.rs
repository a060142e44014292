use async_trait::async_trait;

use super::{decode_event, PgTx, Projection, ProjectionError};
use crate::bounded_contexts::library::domain::events::LibraryEvent;
use crate::bounded_contexts::library::infrastructure::event_store::RecordedEvent;

/// Maintains `collections` and `collection_subscriptions`. Membership rows
/// are keyed `(collection_id, feed)`; first insert takes `max(position)+1`
/// within the collection, reorders rewrite positions to the event's order.
pub struct CollectionsProjection;

#[async_trait]
impl Projection for CollectionsProjection {
    fn name(&self) -> &'static str {
        "collections"
    }

    async fn apply(
        &self,
        tx: &mut PgTx<'_>,
        recorded: &RecordedEvent,
    ) -> Result<(), ProjectionError> {
        match decode_event(recorded)? {
            LibraryEvent::CollectionCreated(event) => {
                sqlx::query(
                    r#"INSERT INTO collections (id, user_id, title, description, color, is_default, is_public, created_at, updated_at)
                       VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
                       ON CONFLICT (id) DO UPDATE SET
                       title = EXCLUDED.title,
                       description = EXCLUDED.description,
                       color = EXCLUDED.color,
                       is_default = EXCLUDED.is_default,
                       is_public = EXCLUDED.is_public,
                       updated_at = EXCLUDED.updated_at"#,
                )
                .bind(event.collection_id.value())
                .bind(&recorded.stream_id)
                .bind(&event.title)
                .bind(&event.description)
                .bind(&event.color)
                .bind(event.is_default)
                .bind(event.is_public)
                .bind(recorded.recorded_at)
                .execute(&mut **tx)
                .await?;
            }
            LibraryEvent::CollectionUpdated(event) => {
                sqlx::query(
                    r#"UPDATE collections SET
                       title = COALESCE($2, title),
                       description = COALESCE($3, description),
                       color = COALESCE($4, color),
                       updated_at = $5
                       WHERE id = $1"#,
                )
                .bind(event.collection_id.value())
                .bind(&event.title)
                .bind(&event.description)
                .bind(&event.color)
                .bind(recorded.recorded_at)
                .execute(&mut **tx)
                .await?;
            }
            LibraryEvent::CollectionDeleted(event) => {
                sqlx::query("DELETE FROM collection_subscriptions WHERE collection_id = $1")
                    .bind(event.collection_id.value())
                    .execute(&mut **tx)
                    .await?;
                sqlx::query("DELETE FROM collections WHERE id = $1")
                    .bind(event.collection_id.value())
                    .execute(&mut **tx)
                    .await?;
            }
            LibraryEvent::CollectionVisibilityChanged(event) => {
                sqlx::query(
                    "UPDATE collections SET is_public = $2, updated_at = $3 WHERE id = $1",
                )
                .bind(event.collection_id.value())
                .bind(event.is_public)
                .bind(recorded.recorded_at)
                .execute(&mut **tx)
                .await?;
            }
            LibraryEvent::FeedAddedToCollection(event) => {
                sqlx::query(
                    r#"INSERT INTO collection_subscriptions (collection_id, feed, position)
                       VALUES ($1, $2,
                               COALESCE((SELECT MAX(position) + 1 FROM collection_subscriptions WHERE collection_id = $1), 0))
                       ON CONFLICT (collection_id, feed) DO NOTHING"#,
                )
                .bind(event.collection_id.value())
                .bind(event.feed.value())
                .execute(&mut **tx)
                .await?;
            }
            LibraryEvent::FeedRemovedFromCollection(event) => {
                sqlx::query(
                    "DELETE FROM collection_subscriptions WHERE collection_id = $1 AND feed = $2",
                )
                .bind(event.collection_id.value())
                .bind(event.feed.value())
                .execute(&mut **tx)
                .await?;
            }
            LibraryEvent::CollectionFeedReordered(event) => {
                for (index, feed) in event.feed_order.iter().enumerate() {
                    sqlx::query(
                        r#"UPDATE collection_subscriptions SET position = $3
                           WHERE collection_id = $1 AND feed = $2"#,
                    )
                    .bind(event.collection_id.value())
                    .bind(feed.value())
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
