use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use forgeq_events::Telemetry;
use forgeq_infra::store::PostgresJobStore;
use forgeq_infra::Config;
use forgeq_reaper::Reaper;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    forgeq_observability::init("forgeq-reaper");

    let config = Config::from_env();
    let store = Arc::new(
        PostgresJobStore::connect(&config.database_url, config.database_max_connections).await?,
    );

    let reaper = Reaper::new(store, &config, Telemetry::new());

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let ctrl_c = tokio::signal::ctrl_c();

            #[cfg(unix)]
            {
                let mut sigterm =
                    tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                        .expect("failed to install SIGTERM handler");
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            #[cfg(not(unix))]
            {
                let _ = ctrl_c.await;
            }

            tracing::info!("shutdown signal received");
            shutdown.cancel();
        });
    }

    reaper.run(shutdown).await;
    Ok(())
}
