use std::sync::Arc;

use sirocco::config::Config;
use sirocco::notify::{LogSink, NotificationDispatcher};
use sirocco::orchestrator::Orchestrator;
use sirocco::provider::registry::ProviderRegistry;
use sirocco::store::FileStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    dotenvy::dotenv().ok();

    tracing::info!("sirocco starting");

    let config = Config::from_env();
    let registry = Arc::new(ProviderRegistry::from_config(&config));
    let store = Arc::new(FileStore::open(".sirocco/tasks").await?);
    let notifier = Arc::new(NotificationDispatcher::new().with_sink(Arc::new(LogSink)));

    let orchestrator = Arc::new(
        Orchestrator::new(registry, store, notifier)
            .with_poll_config(config.poll.clone())
            .with_retrieval_config(config.retrieval.clone()),
    );

    // In-flight work left by a prior process must be re-attached before the
    // service takes new requests; a store failure here halts startup.
    let report = orchestrator.recover().await?;
    tracing::info!(
        resumed = report.resumed,
        failed = report.failed,
        "startup recovery done"
    );

    tokio::signal::ctrl_c().await?;

    tracing::info!("sirocco shutting down");
    orchestrator.shutdown().await;
    Ok(())
}
