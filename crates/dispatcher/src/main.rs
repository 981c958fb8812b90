use convoy_dispatcher::{Dispatcher, Settings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    convoy_observability::init();

    let settings = Settings::from_env()?;
    tracing::info!(
        store = %settings.backend,
        inbound_queue = %settings.queue.inbound_queue,
        outbound_queue = %settings.queue.outbound_queue,
        workers = settings.queue.worker_concurrency,
        "starting dispatcher"
    );

    let dispatcher = Dispatcher::start(settings)?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");
    dispatcher.shutdown().await;

    Ok(())
}
