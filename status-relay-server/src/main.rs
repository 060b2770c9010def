use clap::Parser;
use status_relay::spawn_expiry_sweeper;
use status_relay_server::{build_router, AppState, CliArgs, RouterOptions, ServerConfig};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();

    // Parse command line arguments
    let args = CliArgs::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = ServerConfig::try_from(args)?;

    info!("🚀 Starting status-relay-server v{}", env!("CARGO_PKG_VERSION"));
    info!("🔧 Bucket: {}", config.bucket);
    info!("🔧 Storage root: {}", config.storage_root.display());
    info!(
        "🔧 Terminal statuses: {}",
        config.terminal_policy.labels().collect::<Vec<_>>().join(", ")
    );
    info!("🔧 CORS: {}", if config.cors { "enabled" } else { "disabled" });

    let shutdown = CancellationToken::new();
    let state = AppState::from_config(&config, shutdown.clone());

    let sweeper = spawn_expiry_sweeper(
        state.registry.clone(),
        config.channel_ttl,
        config.sweep_interval,
        shutdown.clone(),
    );

    let app = build_router(state.clone(), RouterOptions::from(&config));

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("✅ Server listening on http://{}", addr);
    info!("📡 WebSocket endpoint: ws://{}/imageStatus/{{id}}/ws", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await?;

    if let Err(e) = sweeper.await {
        warn!("Expiry sweeper ended abnormally: {}", e);
    }

    info!("👋 Server shut down");
    Ok(())
}

async fn shutdown_signal(state: AppState) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C signal"),
        () = terminate => info!("Received SIGTERM signal"),
    }

    // Close channels first so forwarders flush what is buffered before the
    // cancel reaches them.
    info!("🛑 Shutdown signal received, closing live status channels...");
    let closed = state.registry.close_all().await;
    info!("🛑 Closed {} live status channels", closed);
    state.shutdown.cancel();
}
