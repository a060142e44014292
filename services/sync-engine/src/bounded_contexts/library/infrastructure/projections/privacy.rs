use async_trait::async_trait;
use sqlx::Row;

use super::{decode_event, PgTx, Projection, ProjectionError};
use crate::bounded_contexts::library::domain::events::LibraryEvent;
use crate::bounded_contexts::library::domain::value_objects::PrivacySetting;
use crate::bounded_contexts::library::infrastructure::event_store::RecordedEvent;

/// Key of a row candidate for the public feed: which feed/item the event
/// talks about. `None` means the event is never public (library management,
/// checkpoints, system events).
pub fn public_candidate(event: &LibraryEvent) -> Option<(String, String)> {
    match event {
        LibraryEvent::UserSubscribed(e) => Some((e.feed.value().to_string(), String::new())),
        LibraryEvent::PlayRecorded(e) => {
            Some((e.feed.value().to_string(), e.item.value().to_string()))
        }
        LibraryEvent::EpisodeSaved(e) => {
            Some((e.feed.value().to_string(), e.item.value().to_string()))
        }
        LibraryEvent::EpisodeShared(e) => {
            Some((e.feed.value().to_string(), e.item.value().to_string()))
        }
        _ => None,
    }
}

/// Most specific match wins: (feed, item) > (feed, "") > ("", "") > public.
/// Empty strings stand in for "level does not apply", matching the
/// `user_privacy` composite key.
async fn effective_privacy(
    tx: &mut PgTx<'_>,
    user_id: &str,
    feed: &str,
    item: &str,
) -> Result<PrivacySetting, ProjectionError> {
    let row = sqlx::query(
        r#"SELECT privacy FROM user_privacy
           WHERE user_id = $1
             AND ((feed = $2 AND item = $3) OR (feed = $2 AND item = '') OR (feed = '' AND item = ''))
           ORDER BY (feed <> '')::int + (item <> '')::int DESC
           LIMIT 1"#,
    )
    .bind(user_id)
    .bind(feed)
    .bind(item)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(row
        .and_then(|row| {
            let value: String = row.get("privacy");
            PrivacySetting::from_str(&value)
        })
        .unwrap_or(PrivacySetting::Public))
}

/// Maintains `user_privacy` and `public_events`. Public or anonymous events
/// are appended (keyed by global position, so redelivery is a no-op); a
/// privacy change rewrites the user's existing rows, a removal deletes them.
///
/// `user_id` is stored literally even for anonymous rows; the
/// public/anonymous distinction lives in the `privacy` column and is
/// enforced at query time.
pub struct PublicEventsProjection;

impl PublicEventsProjection {
    async fn append_public_event(
        &self,
        tx: &mut PgTx<'_>,
        recorded: &RecordedEvent,
        feed: &str,
        item: &str,
    ) -> Result<(), ProjectionError> {
        let privacy = effective_privacy(tx, &recorded.stream_id, feed, item).await?;
        if privacy == PrivacySetting::Private {
            return Ok(());
        }
        sqlx::query(
            r#"INSERT INTO public_events (global_position, user_id, event_type, feed, item, payload, privacy, recorded_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
               ON CONFLICT (global_position) DO NOTHING"#,
        )
        .bind(recorded.global_position)
        .bind(&recorded.stream_id)
        .bind(&recorded.event_type)
        .bind(feed)
        .bind(item)
        .bind(&recorded.payload)
        .bind(privacy.as_str())
        .bind(recorded.recorded_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Re-evaluate every projected row in scope against the new privacy
    /// table: rows that became private disappear, the rest get their
    /// `privacy` column refreshed. Rows protected by a more specific level
    /// than the changed one are naturally left intact by the re-evaluation.
    async fn rewrite_scope(
        &self,
        tx: &mut PgTx<'_>,
        user_id: &str,
        feed: Option<&str>,
        item: Option<&str>,
    ) -> Result<(), ProjectionError> {
        let rows = match (feed, item) {
            (Some(feed), Some(item)) => {
                sqlx::query(
                    "SELECT DISTINCT feed, item FROM public_events WHERE user_id = $1 AND feed = $2 AND item = $3",
                )
                .bind(user_id)
                .bind(feed)
                .bind(item)
                .fetch_all(&mut **tx)
                .await?
            }
            (Some(feed), None) => {
                sqlx::query(
                    "SELECT DISTINCT feed, item FROM public_events WHERE user_id = $1 AND feed = $2",
                )
                .bind(user_id)
                .bind(feed)
                .fetch_all(&mut **tx)
                .await?
            }
            _ => {
                sqlx::query("SELECT DISTINCT feed, item FROM public_events WHERE user_id = $1")
                    .bind(user_id)
                    .fetch_all(&mut **tx)
                    .await?
            }
        };

        for row in rows {
            let feed: String = row.get("feed");
            let item: String = row.get("item");
            let privacy = effective_privacy(tx, user_id, &feed, &item).await?;
            if privacy == PrivacySetting::Private {
                sqlx::query(
                    "DELETE FROM public_events WHERE user_id = $1 AND feed = $2 AND item = $3",
                )
                .bind(user_id)
                .bind(&feed)
                .bind(&item)
                .execute(&mut **tx)
                .await?;
            } else {
                sqlx::query(
                    "UPDATE public_events SET privacy = $4 WHERE user_id = $1 AND feed = $2 AND item = $3",
                )
                .bind(user_id)
                .bind(&feed)
                .bind(&item)
                .bind(privacy.as_str())
                .execute(&mut **tx)
                .await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Projection for PublicEventsProjection {
    fn name(&self) -> &'static str {
        "public_events"
    }

    async fn apply(
        &self,
        tx: &mut PgTx<'_>,
        recorded: &RecordedEvent,
    ) -> Result<(), ProjectionError> {
        let event = decode_event(recorded)?;
        match &event {
            LibraryEvent::PrivacyChanged(change) => {
                let feed = change.feed.as_ref().map(|f| f.value().to_string());
                let item = change.item.as_ref().map(|i| i.value().to_string());
                sqlx::query(
                    r#"INSERT INTO user_privacy (user_id, feed, item, privacy)
                       VALUES ($1, $2, $3, $4)
                       ON CONFLICT (user_id, feed, item) DO UPDATE SET privacy = EXCLUDED.privacy"#,
                )
                .bind(&recorded.stream_id)
                .bind(feed.clone().unwrap_or_default())
                .bind(item.clone().unwrap_or_default())
                .bind(change.privacy.as_str())
                .execute(&mut **tx)
                .await?;

                self.rewrite_scope(
                    tx,
                    &recorded.stream_id,
                    feed.as_deref(),
                    item.as_deref(),
                )
                .await?;
            }
            LibraryEvent::EventsRemoved(removal) => {
                let feed = removal.feed.as_ref().map(|f| f.value().to_string());
                let item = removal.item.as_ref().map(|i| i.value().to_string());
                match (feed, item) {
                    (Some(feed), Some(item)) => {
                        sqlx::query(
                            "DELETE FROM public_events WHERE user_id = $1 AND feed = $2 AND item = $3",
                        )
                        .bind(&recorded.stream_id)
                        .bind(feed)
                        .bind(item)
                        .execute(&mut **tx)
                        .await?;
                    }
                    (Some(feed), None) => {
                        sqlx::query(
                            "DELETE FROM public_events WHERE user_id = $1 AND feed = $2",
                        )
                        .bind(&recorded.stream_id)
                        .bind(feed)
                        .execute(&mut **tx)
                        .await?;
                    }
                    (None, Some(item)) => {
                        sqlx::query(
                            "DELETE FROM public_events WHERE user_id = $1 AND item = $2",
                        )
                        .bind(&recorded.stream_id)
                        .bind(item)
                        .execute(&mut **tx)
                        .await?;
                    }
                    (None, None) => {
                        sqlx::query("DELETE FROM public_events WHERE user_id = $1")
                            .bind(&recorded.stream_id)
                            .execute(&mut **tx)
                            .await?;
                    }
                }
            }
            other => {
                if let Some((feed, item)) = public_candidate(other) {
                    self.append_public_event(tx, recorded, &feed, &item).await?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounded_contexts::library::domain::events::{
        EpisodeShared, PlaylistDeleted, UserSubscribed,
    };
    use crate::bounded_contexts::library::domain::value_objects::{
        PlaylistId, SourceFeedId, SourceItemId,
    };
    use chrono::Utc;
    use uuid::Uuid;

    fn feed() -> SourceFeedId {
        SourceFeedId::from_url("https://example.org/f.xml")
    }

    fn item() -> SourceItemId {
        SourceItemId::from_parts("g", "https://example.org/e.mp3")
    }

    #[test]
    fn subscribe_is_a_feed_level_candidate() {
        let event = LibraryEvent::UserSubscribed(UserSubscribed {
            feed: feed(),
            rss_source_id: Uuid::new_v4(),
            subscribed_at: Utc::now(),
        });
        let (candidate_feed, candidate_item) = public_candidate(&event).unwrap();
        assert_eq!(candidate_feed, feed().value());
        assert!(candidate_item.is_empty());
    }

    #[test]
    fn share_is_an_item_level_candidate() {
        let event = LibraryEvent::EpisodeShared(EpisodeShared {
            feed: feed(),
            item: item(),
        });
        let (_, candidate_item) = public_candidate(&event).unwrap();
        assert_eq!(candidate_item, item().value());
    }

    #[test]
    fn library_management_events_are_never_public() {
        let event = LibraryEvent::PlaylistDeleted(PlaylistDeleted {
            playlist_id: PlaylistId::new(),
        });
        assert!(public_candidate(&event).is_none());
    }
}
