use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub mod collections;
pub mod play_statuses;
pub mod playlists;
pub mod popularity;
pub mod privacy;
pub mod subscriptions;

pub use collections::CollectionsProjection;
pub use play_statuses::PlayStatusesProjection;
pub use playlists::PlaylistsProjection;
pub use popularity::PopularityProjection;
pub use privacy::PublicEventsProjection;
pub use subscriptions::SubscriptionsProjection;

use crate::bounded_contexts::library::infrastructure::event_store::{EventStore, RecordedEvent};

pub type PgTx<'a> = Transaction<'a, Postgres>;

#[derive(Error, Debug)]
pub enum ProjectionError {
    /// Transient; the runner retries with backoff.
    #[error("database error: {0}")]
    Database(String),

    /// Deterministic; the runner halts at the offending position.
    #[error("malformed event at global position {position}: {detail}")]
    BadEvent { position: i64, detail: String },
}

impl From<sqlx::Error> for ProjectionError {
    fn from(err: sqlx::Error) -> Self {
        ProjectionError::Database(err.to_string())
    }
}

/// One read-model family. `apply` turns a single event into SQL mutations on
/// the provided transaction; the runner commits them together with the
/// checkpoint update. Handlers must be idempotent per event.
#[async_trait]
pub trait Projection: Send + Sync {
    fn name(&self) -> &'static str;

    async fn apply(
        &self,
        tx: &mut PgTx<'_>,
        event: &RecordedEvent,
    ) -> Result<(), ProjectionError>;
}

pub async fn load_checkpoint(pool: &PgPool, name: &str) -> Result<i64, sqlx::Error> {
    sqlx::query("INSERT INTO checkpoints (name, last_global_position) VALUES ($1, 0) ON CONFLICT (name) DO NOTHING")
        .bind(name)
        .execute(pool)
        .await?;
    sqlx::query_scalar("SELECT last_global_position FROM checkpoints WHERE name = $1")
        .bind(name)
        .fetch_one(pool)
        .await
}

async fn advance_checkpoint(
    tx: &mut PgTx<'_>,
    name: &str,
    position: i64,
) -> Result<(), sqlx::Error> {
    // GREATEST keeps the checkpoint monotone even if an operator rewinds a
    // runner without resetting the table.
    sqlx::query(
        r#"INSERT INTO checkpoints (name, last_global_position) VALUES ($1, $2)
           ON CONFLICT (name) DO UPDATE
           SET last_global_position = GREATEST(checkpoints.last_global_position, EXCLUDED.last_global_position)"#,
    )
    .bind(name)
    .bind(position)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

const BACKOFF_INITIAL: Duration = Duration::from_millis(250);
const BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Long-running subscriber for one projection. Reads the global log from
/// the persisted checkpoint and applies events strictly in order; each event
/// and its checkpoint update commit in a single transaction, so the
/// projection never advances past an event it did not apply.
pub struct ProjectionRunner {
    pool: PgPool,
    store: Arc<dyn EventStore>,
    projection: Arc<dyn Projection>,
    batch_size: usize,
    poll_interval: Duration,
}

impl ProjectionRunner {
    pub fn new(pool: PgPool, store: Arc<dyn EventStore>, projection: Arc<dyn Projection>) -> Self {
        Self {
            pool,
            store,
            projection,
            batch_size: 256,
            poll_interval: Duration::from_millis(500),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub async fn run(self, cancel: CancellationToken) {
        let name = self.projection.name();
        let mut position = loop {
            match load_checkpoint(&self.pool, name).await {
                Ok(position) => break position,
                Err(err) => {
                    warn!(projection = name, "failed to load checkpoint: {err}");
                    if wait_or_cancel(BACKOFF_INITIAL, &cancel).await {
                        return;
                    }
                }
            }
        };
        info!(projection = name, last_global_position = position, "projection runner started");

        'outer: loop {
            if cancel.is_cancelled() {
                break;
            }

            let page = match self.store.read_all(position, self.batch_size).await {
                Ok(page) => page,
                Err(err) => {
                    warn!(projection = name, "event store read failed: {err}");
                    if wait_or_cancel(BACKOFF_INITIAL, &cancel).await {
                        break;
                    }
                    continue;
                }
            };

            if page.is_empty() {
                if wait_or_cancel(self.poll_interval, &cancel).await {
                    break;
                }
                continue;
            }

            for event in &page {
                // Shutdown is honored between events only; an event either
                // commits with its checkpoint or is re-delivered next start.
                if cancel.is_cancelled() {
                    break 'outer;
                }
                match self.apply_with_retry(event, &cancel).await {
                    ApplyOutcome::Applied => position = event.global_position,
                    ApplyOutcome::Halt => break 'outer,
                    ApplyOutcome::Cancelled => break 'outer,
                }
            }
        }
        info!(projection = name, "projection runner stopped");
    }

    async fn apply_with_retry(&self, event: &RecordedEvent, cancel: &CancellationToken) -> ApplyOutcome {
        let name = self.projection.name();
        let mut backoff = BACKOFF_INITIAL;
        loop {
            match self.apply_once(event).await {
                Ok(()) => {
                    debug!(
                        projection = name,
                        global_position = event.global_position,
                        event_type = %event.event_type,
                        "event applied"
                    );
                    return ApplyOutcome::Applied;
                }
                Err(ProjectionError::BadEvent { position, detail }) => {
                    error!(
                        projection = name,
                        global_position = position,
                        stream_id = %event.stream_id,
                        stream_version = event.stream_version,
                        %detail,
                        "malformed event; halting this projection"
                    );
                    return ApplyOutcome::Halt;
                }
                Err(ProjectionError::Database(detail)) => {
                    warn!(
                        projection = name,
                        global_position = event.global_position,
                        backoff_ms = backoff.as_millis() as u64,
                        %detail,
                        "projection apply failed; backing off"
                    );
                    // Jitter keeps parallel subscribers from hammering a
                    // recovering database in lockstep.
                    let jitter = Duration::from_millis(rand::random::<u64>() % 100);
                    if wait_or_cancel(backoff + jitter, cancel).await {
                        return ApplyOutcome::Cancelled;
                    }
                    backoff = (backoff * 2).min(BACKOFF_MAX);
                }
            }
        }
    }

    async fn apply_once(&self, event: &RecordedEvent) -> Result<(), ProjectionError> {
        let mut tx = self.pool.begin().await?;
        self.projection.apply(&mut tx, event).await?;
        advance_checkpoint(&mut tx, self.projection.name(), event.global_position).await?;
        tx.commit().await?;
        Ok(())
    }
}

enum ApplyOutcome {
    Applied,
    Halt,
    Cancelled,
}

/// Returns true when cancelled.
async fn wait_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}

/// Decode the domain event, mapping failures to the halting error class.
pub(crate) fn decode_event(
    recorded: &RecordedEvent,
) -> Result<crate::bounded_contexts::library::domain::events::LibraryEvent, ProjectionError> {
    recorded.decode().map_err(|err| ProjectionError::BadEvent {
        position: recorded.global_position,
        detail: err.to_string(),
    })
}
