use sync_engine::bounded_contexts::library::presentation::create_sync_routes;
use sync_engine::config::Config;
use sync_engine::shared::infrastructure::app_state::AppState;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!(e.to_string()))?;
    let bind_addr = config.bind_addr;

    let state = AppState::new(config)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    let workers = state.spawn_workers();
    let shutdown = state.shutdown.clone();

    let app = create_sync_routes(state);
    let listener = TcpListener::bind(bind_addr).await?;
    info!(%bind_addr, "sync engine listening");

    axum::serve(listener, app)
        .with_graceful_shutdown({
            let shutdown = shutdown.clone();
            async move {
                let _ = tokio::signal::ctrl_c().await;
                info!("shutdown signal received");
                shutdown.cancel();
            }
        })
        .await?;

    // Projectors stop between events; the snapshot worker between cycles.
    for worker in workers {
        let _ = worker.await;
    }
    info!("sync engine stopped");
    Ok(())
}
