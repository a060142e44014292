use async_trait::async_trait;

use super::{decode_event, PgTx, Projection, ProjectionError};
use crate::bounded_contexts::library::domain::events::LibraryEvent;
use crate::bounded_contexts::library::infrastructure::event_store::RecordedEvent;

/// Maintains the `play_statuses` read model: last known position and played
/// flag per `(user_id, item)`.
pub struct PlayStatusesProjection;

#[async_trait]
impl Projection for PlayStatusesProjection {
    fn name(&self) -> &'static str {
        "play_statuses"
    }

    async fn apply(
        &self,
        tx: &mut PgTx<'_>,
        recorded: &RecordedEvent,
    ) -> Result<(), ProjectionError> {
        match decode_event(recorded)? {
            LibraryEvent::PlayRecorded(event) => {
                sqlx::query(
                    r#"INSERT INTO play_statuses (user_id, item, feed, position, played, updated_at)
                       VALUES ($1, $2, $3, $4, $5, $6)
                       ON CONFLICT (user_id, item) DO UPDATE SET
                       feed = EXCLUDED.feed,
                       position = EXCLUDED.position,
                       played = EXCLUDED.played,
                       updated_at = EXCLUDED.updated_at"#,
                )
                .bind(&recorded.stream_id)
                .bind(event.item.value())
                .bind(event.feed.value())
                .bind(event.position)
                .bind(event.played)
                .bind(event.timestamp)
                .execute(&mut **tx)
                .await?;
            }
            LibraryEvent::PositionUpdated(event) => {
                // A bare position update never flips the played flag.
                sqlx::query(
                    r#"INSERT INTO play_statuses (user_id, item, feed, position, played, updated_at)
                       VALUES ($1, $2, $3, $4, FALSE, $5)
                       ON CONFLICT (user_id, item) DO UPDATE SET
                       feed = EXCLUDED.feed,
                       position = EXCLUDED.position,
                       updated_at = EXCLUDED.updated_at"#,
                )
                .bind(&recorded.stream_id)
                .bind(event.item.value())
                .bind(event.feed.value())
                .bind(event.position)
                .bind(event.timestamp)
                .execute(&mut **tx)
                .await?;
            }
            _ => {}
        }
        Ok(())
    }
}
