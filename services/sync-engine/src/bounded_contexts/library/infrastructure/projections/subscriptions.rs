use async_trait::async_trait;

use super::{decode_event, PgTx, Projection, ProjectionError};
use crate::bounded_contexts::library::domain::events::LibraryEvent;
use crate::bounded_contexts::library::infrastructure::event_store::RecordedEvent;

/// Maintains the `subscriptions` read model: one row per `(user_id, feed)`,
/// timestamps replaced on every (re-)subscribe. `feed_title` is owned by the
/// RSS enrichment side and never written here.
pub struct SubscriptionsProjection;

#[async_trait]
impl Projection for SubscriptionsProjection {
    fn name(&self) -> &'static str {
        "subscriptions"
    }

    async fn apply(
        &self,
        tx: &mut PgTx<'_>,
        recorded: &RecordedEvent,
    ) -> Result<(), ProjectionError> {
        match decode_event(recorded)? {
            LibraryEvent::UserSubscribed(event) => {
                sqlx::query(
                    r#"INSERT INTO subscriptions (user_id, feed, rss_source_id, subscribed_at, unsubscribed_at)
                       VALUES ($1, $2, $3, $4, NULL)
                       ON CONFLICT (user_id, feed) DO UPDATE SET
                       rss_source_id = EXCLUDED.rss_source_id,
                       subscribed_at = EXCLUDED.subscribed_at,
                       unsubscribed_at = NULL"#,
                )
                .bind(&recorded.stream_id)
                .bind(event.feed.value())
                .bind(event.rss_source_id)
                .bind(event.subscribed_at)
                .execute(&mut **tx)
                .await?;
            }
            LibraryEvent::UserUnsubscribed(event) => {
                sqlx::query(
                    "UPDATE subscriptions SET unsubscribed_at = $3 WHERE user_id = $1 AND feed = $2",
                )
                .bind(&recorded.stream_id)
                .bind(event.feed.value())
                .bind(event.unsubscribed_at)
                .execute(&mut **tx)
                .await?;
            }
            _ => {}
        }
        Ok(())
    }
}
