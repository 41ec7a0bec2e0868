// kiro-proxy - OpenAI and Anthropic compatible gateway to the Kiro backend

use anyhow::{Context, Result};
use clap::Parser;
use kiro_proxy::backend::KiroClient;
use kiro_proxy::cli::Args;
use kiro_proxy::config::AppConfig;
use kiro_proxy::credentials::CredentialManager;
use kiro_proxy::server::create_router;
use kiro_proxy::utils::logging;
use std::net::SocketAddr;
use tokio::signal;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Phase 1: Load configuration
    let mut config = AppConfig::load(args.config.as_deref())?;
    args.apply(&mut config);

    // Phase 2: Initialize logging
    logging::init(&config.logging)?;
    info!("Starting kiro-proxy v{}", env!("CARGO_PKG_VERSION"));

    // Phase 3: Refuse to start without an API key
    config.validate()?;

    // Phase 4: Load Kiro credentials
    info!("Loading Kiro credentials from {}", config.credentials_file);
    let credentials = CredentialManager::new(&config.credentials, &config.credentials_file)
        .context("could not load Kiro credentials; sign in with the Kiro IDE first")?;

    let (expires_in, needs_refresh) = credentials.token_info();
    if needs_refresh {
        warn!(
            "Access token expires in {}s; it will be refreshed on first use",
            expires_in
        );
    }

    // Phase 5: Backend client
    let backend = KiroClient::new(&config.backend)?;

    // Phase 6: Build and start HTTP server
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let app = create_router(config, backend, credentials)?;

    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Phase 7: Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
