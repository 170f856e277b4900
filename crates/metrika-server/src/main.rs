use anyhow::Result;
use metrika_server::app::build_http_app;
use metrika_server::config::ServerConfig;
use metrika_server::state::AppState;
use metrika_storage::open_storage;
use std::net::SocketAddr;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("metrika=info".parse()?))
        .init();

    let config = ServerConfig::load()?;
    tracing::info!(
        address = %config.address,
        signed = config.key.is_some(),
        trusted_subnet = ?config.trusted_subnet.map(|s| s.to_string()),
        "metrika-server starting"
    );

    let shutdown = CancellationToken::new();
    let (storage, checkpointer) = match open_storage(&config.storage_options(), shutdown.clone()).await {
        Ok(opened) => (Some(opened.storage), opened.checkpointer),
        Err(e) => {
            tracing::error!(error = %e, "Storage initialization failed, serving without a store");
            (None, None)
        }
    };

    let address = config.address.clone();
    let state = AppState::new(config, storage)?;
    let app = build_http_app(state);

    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!(addr = %listener.local_addr()?, "HTTP server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
        }
        tracing::info!("Shutting down gracefully");
    })
    .await?;

    shutdown.cancel();
    if let Some(handle) = checkpointer {
        handle.await?;
    }
    tracing::info!("Server stopped");
    Ok(())
}
