use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use forgeq_core::WorkerId;
use forgeq_events::Telemetry;
use forgeq_infra::store::PostgresJobStore;
use forgeq_infra::Config;
use forgeq_queue::HandlerRegistry;
use forgeq_worker::{default_worker_id, register_builtin, Worker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    forgeq_observability::init("forgeq-worker");

    let config = Config::from_env();
    let worker_id = match &config.worker_id {
        Some(raw) => WorkerId::new(raw.clone())?,
        None => default_worker_id(),
    };

    let store = Arc::new(
        PostgresJobStore::connect(&config.database_url, config.database_max_connections).await?,
    );

    let mut registry = HandlerRegistry::new();
    register_builtin(&mut registry);

    let worker = Worker::new(
        store,
        Arc::new(registry),
        worker_id.clone(),
        &config,
        Telemetry::new(),
    );

    // SIGTERM/SIGINT trigger a drain; a second signal is left to the
    // default disposition (hard kill).
    let shutdown = CancellationToken::new();
    spawn_signal_listener(shutdown.clone());

    tracing::info!(worker_id = %worker_id, "forgeq worker ready");
    worker.run(shutdown).await?;
    Ok(())
}

fn spawn_signal_listener(shutdown: CancellationToken) {
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
