use async_trait::async_trait;

use super::{decode_event, PgTx, Projection, ProjectionError};
use crate::bounded_contexts::library::domain::events::LibraryEvent;
use crate::bounded_contexts::library::infrastructure::event_store::RecordedEvent;

// Integer score weights per action.
pub const SCORE_SUBSCRIBE: i64 = 10;
pub const SCORE_PLAY: i64 = 5;
pub const SCORE_SAVE: i64 = 3;
pub const SCORE_SHARE: i64 = 2;

/// Maintains `podcast_popularity` and `episode_popularity`. Counters are
/// plain arithmetic; redelivery safety comes from the runner committing each
/// event together with the checkpoint, never from the statements themselves.
/// `PopularityRecalculated` rolls the `_previous` columns the trending
/// read side diffs against.
pub struct PopularityProjection;

impl PopularityProjection {
    async fn bump_podcast_score(
        &self,
        tx: &mut PgTx<'_>,
        feed: &str,
        delta: i64,
    ) -> Result<(), ProjectionError> {
        sqlx::query(
            r#"INSERT INTO podcast_popularity (feed, score) VALUES ($1, GREATEST(0, $2))
               ON CONFLICT (feed) DO UPDATE SET score = GREATEST(0, podcast_popularity.score + $2)"#,
        )
        .bind(feed)
        .bind(delta)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn bump_episode(
        &self,
        tx: &mut PgTx<'_>,
        item: &str,
        feed: &str,
        score_delta: i64,
        plays_delta: i64,
        likes_delta: i64,
    ) -> Result<(), ProjectionError> {
        sqlx::query(
            r#"INSERT INTO episode_popularity (item, feed, score, plays, likes)
               VALUES ($1, $2, GREATEST(0, $3), $4, $5)
               ON CONFLICT (item) DO UPDATE SET
               score = GREATEST(0, episode_popularity.score + $3),
               plays = episode_popularity.plays + $4,
               likes = episode_popularity.likes + $5"#,
        )
        .bind(item)
        .bind(feed)
        .bind(score_delta)
        .bind(plays_delta)
        .bind(likes_delta)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Projection for PopularityProjection {
    fn name(&self) -> &'static str {
        "popularity"
    }

    async fn apply(
        &self,
        tx: &mut PgTx<'_>,
        recorded: &RecordedEvent,
    ) -> Result<(), ProjectionError> {
        match decode_event(recorded)? {
            LibraryEvent::UserSubscribed(event) => {
                self.bump_podcast_score(tx, event.feed.value(), SCORE_SUBSCRIBE)
                    .await?;
            }
            LibraryEvent::UserUnsubscribed(event) => {
                self.bump_podcast_score(tx, event.feed.value(), -SCORE_SUBSCRIBE)
                    .await?;
            }
            LibraryEvent::PlayRecorded(event) => {
                sqlx::query(
                    r#"INSERT INTO podcast_popularity (feed, score, plays, plays_people)
                       VALUES ($1, $2, 1, ARRAY[$3])
                       ON CONFLICT (feed) DO UPDATE SET
                       score = podcast_popularity.score + $2,
                       plays = podcast_popularity.plays + 1,
                       plays_people = CASE
                           WHEN $3 = ANY(podcast_popularity.plays_people) THEN podcast_popularity.plays_people
                           ELSE array_append(podcast_popularity.plays_people, $3)
                       END"#,
                )
                .bind(event.feed.value())
                .bind(SCORE_PLAY)
                .bind(&recorded.stream_id)
                .execute(&mut **tx)
                .await?;

                self.bump_episode(tx, event.item.value(), event.feed.value(), SCORE_PLAY, 1, 0)
                    .await?;
            }
            LibraryEvent::EpisodeSaved(event) => {
                sqlx::query(
                    r#"INSERT INTO podcast_popularity (feed, score, likes) VALUES ($1, $2, 1)
                       ON CONFLICT (feed) DO UPDATE SET
                       score = podcast_popularity.score + $2,
                       likes = podcast_popularity.likes + 1"#,
                )
                .bind(event.feed.value())
                .bind(SCORE_SAVE)
                .execute(&mut **tx)
                .await?;

                self.bump_episode(tx, event.item.value(), event.feed.value(), SCORE_SAVE, 0, 1)
                    .await?;
            }
            LibraryEvent::EpisodeShared(event) => {
                self.bump_podcast_score(tx, event.feed.value(), SCORE_SHARE)
                    .await?;
                self.bump_episode(tx, event.item.value(), event.feed.value(), SCORE_SHARE, 0, 0)
                    .await?;
            }
            LibraryEvent::PopularityRecalculated(event) => {
                let feeds: Vec<String> =
                    event.feeds.iter().map(|f| f.value().to_string()).collect();
                sqlx::query(
                    r#"UPDATE podcast_popularity SET
                       score_previous = score,
                       plays_previous = plays,
                       likes_previous = likes
                       WHERE feed = ANY($1)"#,
                )
                .bind(&feeds)
                .execute(&mut **tx)
                .await?;
                sqlx::query(
                    r#"UPDATE episode_popularity SET
                       score_previous = score,
                       plays_previous = plays,
                       likes_previous = likes
                       WHERE feed = ANY($1)"#,
                )
                .bind(&feeds)
                .execute(&mut **tx)
                .await?;
            }
            _ => {}
        }
        Ok(())
    }
}
