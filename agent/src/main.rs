use anyhow::Result;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use backup_agent::backup::BackupWorkflow;
use backup_agent::config::load_config;
use backup_agent::services::tools;
use backup_agent::{build_router, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = EnvFilter::from_default_env()
        .add_directive("backup_agent=info".parse()?)
        .add_directive("tower_http=warn".parse()?)
        .add_directive("hyper=warn".parse()?);

    fmt().with_env_filter(env_filter).init();

    info!("Starting Backup Agent");

    let config = load_config().await?;

    let tar_command = match &config.tar_command {
        Some(tar) => tar.clone(),
        None => tools::detect_tar_command().await,
    };
    let settings = config.backup_settings(tar_command)?;

    info!(
        "Configuration loaded: {} targets, backup root {}, default strategy {}",
        config.targets.len(),
        settings.backup_root.display(),
        config.strategy
    );

    let bind_address = config.bind_address.clone();
    let state = Arc::new(AppState::new(config, BackupWorkflow::with_defaults(settings)));
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!("Backup agent listening on {}", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Backup agent stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received, finishing in-flight requests");
}
