use crate::settings::Settings;
use prefect_client::PrefectClient;
use sendpost_engine::Engine;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Run workers and the schedule sync loop until Ctrl-C.
pub fn run(settings: &Settings) -> anyhow::Result<()> {
    let store = settings.open_store()?;
    let executor = Arc::new(PrefectClient::new(&settings.config.executor)?);
    let engine = Engine::new(store, executor, &settings.config.engine);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let shutdown = CancellationToken::new();
        let mut workers = engine.spawn_workers(shutdown.clone());
        let sync = tokio::spawn(
            engine
                .schedule_sync()
                .run(engine.config().sync_interval, shutdown.clone()),
        );

        info!(
            store = %settings.store_path().display(),
            api_url = %settings.config.executor.api_url,
            workers = engine.config().workers,
            "sendpost daemon started"
        );

        tokio::signal::ctrl_c().await?;
        info!("shutting down");
        shutdown.cancel();

        while workers.join_next().await.is_some() {}
        if let Err(e) = sync.await {
            tracing::warn!(error = %e, "schedule sync task failed");
        }
        Ok(())
    })
}
