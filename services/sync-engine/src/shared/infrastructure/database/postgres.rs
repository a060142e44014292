use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::shared::domain::errors::AppError;

pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool, AppError> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .map_err(|e| AppError::database(format!("failed to connect to PostgreSQL: {}", e)))
}

/// Bootstrap every table the engine owns. Statements are idempotent; proper
/// migration tooling is intentionally out of scope.
pub async fn init_schema(pool: &PgPool) -> Result<(), AppError> {
    let statements = [
        // Event store
        r#"CREATE TABLE IF NOT EXISTS events (
            global_position BIGSERIAL PRIMARY KEY,
            stream_id TEXT NOT NULL,
            stream_version BIGINT NOT NULL,
            type TEXT NOT NULL,
            payload JSONB NOT NULL,
            metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
            recorded_at TIMESTAMPTZ NOT NULL,
            UNIQUE (stream_id, stream_version)
        )"#,
        r#"CREATE INDEX IF NOT EXISTS idx_events_stream
            ON events (stream_id, stream_version)"#,
        // Projector checkpoints
        r#"CREATE TABLE IF NOT EXISTS checkpoints (
            name TEXT PRIMARY KEY,
            last_global_position BIGINT NOT NULL
        )"#,
        // Read models
        r#"CREATE TABLE IF NOT EXISTS subscriptions (
            user_id TEXT NOT NULL,
            feed TEXT NOT NULL,
            rss_source_id UUID NOT NULL,
            subscribed_at TIMESTAMPTZ NOT NULL,
            unsubscribed_at TIMESTAMPTZ,
            feed_title TEXT,
            PRIMARY KEY (user_id, feed)
        )"#,
        r#"CREATE TABLE IF NOT EXISTS play_statuses (
            user_id TEXT NOT NULL,
            item TEXT NOT NULL,
            feed TEXT NOT NULL,
            position BIGINT NOT NULL DEFAULT 0,
            played BOOLEAN NOT NULL DEFAULT FALSE,
            updated_at TIMESTAMPTZ NOT NULL,
            PRIMARY KEY (user_id, item)
        )"#,
        r#"CREATE TABLE IF NOT EXISTS playlists (
            id UUID PRIMARY KEY,
            user_id TEXT NOT NULL,
            name TEXT NOT NULL,
            description TEXT,
            is_public BOOLEAN NOT NULL DEFAULT FALSE,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL,
            deleted_at TIMESTAMPTZ
        )"#,
        r#"CREATE INDEX IF NOT EXISTS idx_playlists_user ON playlists (user_id)"#,
        r#"CREATE TABLE IF NOT EXISTS playlist_items (
            playlist_id UUID NOT NULL,
            user_id TEXT NOT NULL,
            feed TEXT NOT NULL,
            item TEXT NOT NULL,
            item_title TEXT,
            feed_title TEXT,
            position BIGINT NOT NULL DEFAULT 0,
            added_at TIMESTAMPTZ NOT NULL,
            PRIMARY KEY (playlist_id, feed, item)
        )"#,
        r#"CREATE TABLE IF NOT EXISTS collections (
            id UUID PRIMARY KEY,
            user_id TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT,
            color TEXT,
            is_default BOOLEAN NOT NULL DEFAULT FALSE,
            is_public BOOLEAN NOT NULL DEFAULT FALSE,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )"#,
        r#"CREATE INDEX IF NOT EXISTS idx_collections_user ON collections (user_id)"#,
        r#"CREATE TABLE IF NOT EXISTS collection_subscriptions (
            collection_id UUID NOT NULL,
            feed TEXT NOT NULL,
            position BIGINT NOT NULL DEFAULT 0,
            PRIMARY KEY (collection_id, feed)
        )"#,
        r#"CREATE TABLE IF NOT EXISTS user_privacy (
            user_id TEXT NOT NULL,
            feed TEXT NOT NULL DEFAULT '',
            item TEXT NOT NULL DEFAULT '',
            privacy TEXT NOT NULL,
            PRIMARY KEY (user_id, feed, item)
        )"#,
        r#"CREATE TABLE IF NOT EXISTS public_events (
            global_position BIGINT PRIMARY KEY,
            user_id TEXT NOT NULL,
            event_type TEXT NOT NULL,
            feed TEXT NOT NULL DEFAULT '',
            item TEXT NOT NULL DEFAULT '',
            payload JSONB NOT NULL,
            privacy TEXT NOT NULL,
            recorded_at TIMESTAMPTZ NOT NULL
        )"#,
        r#"CREATE INDEX IF NOT EXISTS idx_public_events_user ON public_events (user_id)"#,
        r#"CREATE TABLE IF NOT EXISTS podcast_popularity (
            feed TEXT PRIMARY KEY,
            score BIGINT NOT NULL DEFAULT 0,
            plays BIGINT NOT NULL DEFAULT 0,
            likes BIGINT NOT NULL DEFAULT 0,
            plays_people TEXT[] NOT NULL DEFAULT '{}',
            score_previous BIGINT NOT NULL DEFAULT 0,
            plays_previous BIGINT NOT NULL DEFAULT 0,
            likes_previous BIGINT NOT NULL DEFAULT 0
        )"#,
        r#"CREATE TABLE IF NOT EXISTS episode_popularity (
            item TEXT PRIMARY KEY,
            feed TEXT NOT NULL,
            score BIGINT NOT NULL DEFAULT 0,
            plays BIGINT NOT NULL DEFAULT 0,
            likes BIGINT NOT NULL DEFAULT 0,
            score_previous BIGINT NOT NULL DEFAULT 0,
            plays_previous BIGINT NOT NULL DEFAULT 0,
            likes_previous BIGINT NOT NULL DEFAULT 0
        )"#,
        r#"CREATE INDEX IF NOT EXISTS idx_episode_popularity_feed
            ON episode_popularity (feed)"#,
    ];

    for statement in statements {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

pub async fn health_check(pool: &PgPool) -> Result<(), AppError> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}
