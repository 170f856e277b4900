use anyhow::Result;
use metrika_agent::config::AgentConfig;
use metrika_agent::dispatch::Dispatcher;
use metrika_agent::scheduler::Scheduler;
use metrika_agent::store::LocalStore;
use metrika_collector::runtime::RuntimeCollector;
use metrika_collector::system::SystemCollector;
use metrika_collector::Collector;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("metrika=info".parse()?))
        .init();

    let config = AgentConfig::load()?;
    tracing::info!(
        server = %config.server_url(),
        rate_limit = config.rate_limit,
        batch = config.batch,
        signed = config.key.is_some(),
        "metrika-agent starting"
    );

    let collectors: Vec<Box<dyn Collector>> = vec![
        Box::new(RuntimeCollector::new()?),
        Box::new(SystemCollector::new()),
    ];
    let dispatcher = Dispatcher::new(&config)?;
    let scheduler = Scheduler::new(
        collectors,
        Arc::new(LocalStore::new()),
        dispatcher,
        config.poll_interval,
        config.report_interval,
    );

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(scheduler.run(shutdown.clone()));

    signal::ctrl_c().await?;
    tracing::info!("Shutting down gracefully");
    shutdown.cancel();
    handle.await?;

    Ok(())
}
