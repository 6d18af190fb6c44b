use std::sync::Arc;

use rh_search::{register_baselines, FileCatalog, ModelRegistry, SearchExecutor};
use rh_worker::{DispatchLoop, WorkerConfig};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = WorkerConfig::load()?;
    let layout = config.layout();
    let store = rh_store::connect(&config.store_config()).await?;
    info!(
        backend = %store.backend(),
        data = %layout.root().display(),
        "store ready"
    );

    let mut registry = ModelRegistry::new();
    register_baselines(&mut registry);
    registry.require(&config.solutions)?;

    let executor = SearchExecutor::new(
        Arc::clone(&store),
        layout.clone(),
        Arc::new(registry),
        Arc::new(FileCatalog::new(layout)),
    )
    .with_results_queue(&config.results_queue);

    let worker = DispatchLoop::new(store, Arc::new(executor), &config);
    worker
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "cannot listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await;

    Ok(())
}
