use std::net::SocketAddr;

use anyhow::Context;
use bucket_browser::{
    config::{Config, StorageProvider},
    create_router,
    utils::init_logger,
    AppState,
};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

/// Upload files to an object-storage bucket and browse them with public or
/// signed links.
#[derive(Debug, Parser)]
#[command(name = "bucket-browser", version, about)]
struct Args {
    /// Address to bind (overrides HOST)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Storage backend: s3 or memory (overrides STORAGE_PROVIDER)
    #[arg(long)]
    provider: Option<StorageProvider>,

    /// Validate configuration and exit
    #[arg(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _log_guard = init_logger();

    // Load configuration
    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(provider) = args.provider {
        config.storage.provider = provider;
    }
    config.validate().context("Invalid configuration")?;
    info!("Configuration loaded: {:?}", config.server);
    info!("Storage configuration: {:?}", config.storage);

    if args.check_config {
        info!("Configuration is valid");
        return Ok(());
    }

    // Create shared state
    let state = AppState::from_config(config.clone())?;
    let app = create_router(state);

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", config.server.host, config.server.port))?;
    info!("Server listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    Ok(())
}
