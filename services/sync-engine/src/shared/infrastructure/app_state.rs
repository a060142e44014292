use chrono::Duration as ChronoDuration;
use sqlx::PgPool;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bounded_contexts::library::application::dispatcher::Dispatcher;
use crate::bounded_contexts::library::application::runtime::{AggregateRuntime, RuntimeConfig};
use crate::bounded_contexts::library::infrastructure::event_store::{
    EventStore, PostgresEventStore,
};
use crate::bounded_contexts::library::infrastructure::projections::{
    CollectionsProjection, PlayStatusesProjection, PlaylistsProjection, PopularityProjection,
    Projection, ProjectionRunner, PublicEventsProjection, SubscriptionsProjection,
};
use crate::bounded_contexts::library::infrastructure::rate_limiter::PlayRateLimiter;
use crate::bounded_contexts::library::infrastructure::snapshot::{
    SnapshotWorker, SnapshotWorkerConfig,
};
use crate::config::Config;
use crate::shared::domain::errors::AppError;
use crate::shared::infrastructure::database::postgres::{create_pool, init_schema};

/// Shared state handed to the axum routers and the background workers.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub store: Arc<dyn EventStore>,
    pub runtime: Arc<AggregateRuntime>,
    pub dispatcher: Arc<Dispatcher>,
    pub rate_limiter: Arc<PlayRateLimiter>,
    pub config: Config,
    pub shutdown: CancellationToken,
}

impl AppState {
    pub async fn new(config: Config) -> Result<Self, AppError> {
        let pool = create_pool(&config.database_url, config.db_max_connections).await?;
        init_schema(&pool).await?;

        let store: Arc<dyn EventStore> = Arc::new(PostgresEventStore::new(pool.clone()));
        let runtime = Arc::new(AggregateRuntime::new(
            Arc::clone(&store),
            RuntimeConfig {
                max_retries: config.max_command_retries,
                idle_ttl: config.aggregate_idle_ttl,
                ..RuntimeConfig::default()
            },
        ));
        let dispatcher = Arc::new(
            Dispatcher::new(Arc::clone(&runtime)).with_command_timeout(config.command_timeout),
        );
        let rate_limiter = Arc::new(PlayRateLimiter::new(
            config.rate_limit_capacity,
            config.rate_limit_refill_per_sec,
        ));

        Ok(Self {
            pool,
            store,
            runtime,
            dispatcher,
            rate_limiter,
            config,
            shutdown: CancellationToken::new(),
        })
    }

    /// Spawn one runner per projection, the snapshot worker and the cache
    /// eviction loop. All stop on the shutdown token.
    pub fn spawn_workers(&self) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        let projections: Vec<Arc<dyn Projection>> = vec![
            Arc::new(SubscriptionsProjection),
            Arc::new(PlayStatusesProjection),
            Arc::new(PlaylistsProjection),
            Arc::new(CollectionsProjection),
            Arc::new(PublicEventsProjection),
            Arc::new(PopularityProjection),
        ];
        for projection in projections {
            let runner = ProjectionRunner::new(
                self.pool.clone(),
                Arc::clone(&self.store),
                projection,
            )
            .with_batch_size(self.config.projection_batch_size)
            .with_poll_interval(self.config.projection_poll_interval);
            let cancel = self.shutdown.clone();
            handles.push(tokio::spawn(async move { runner.run(cancel).await }));
        }

        let worker = SnapshotWorker::new(
            self.pool.clone(),
            Arc::clone(&self.store),
            Arc::clone(&self.dispatcher),
            SnapshotWorkerConfig {
                checkpoint_age: ChronoDuration::days(self.config.checkpoint_age_days),
                interval: self.config.snapshot_interval,
            },
        );
        let cancel = self.shutdown.clone();
        handles.push(tokio::spawn(async move { worker.run(cancel).await }));

        let runtime = Arc::clone(&self.runtime);
        let interval = self.config.eviction_interval;
        let cancel = self.shutdown.clone();
        handles.push(tokio::spawn(async move {
            runtime.run_eviction_loop(interval, cancel).await
        }));

        handles
    }
}
