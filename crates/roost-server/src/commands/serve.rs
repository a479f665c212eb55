//! Serve command handler

use anyhow::{Context, Result};
use tracing::{info, warn};

use roost_core::mirror::WorkerConfig;
use roost_core::{spawn_mirror_worker, Config};
use roost_server::{router, AppState};

use crate::output::Output;

/// Run the HTTP server until Ctrl-C
pub async fn serve(
    mut config: Config,
    host: Option<String>,
    port: Option<u16>,
    output: &Output,
) -> Result<()> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    let addr = config.bind_addr();
    let worker_config = WorkerConfig::from(&config.sync);

    let (state, events) = AppState::connect(config).await?;

    let boot = state.store.boot(&state.mirror).await?;
    info!(
        restored = boot.restored.len(),
        defaulted = boot.defaulted.len(),
        mirror = ?state.mirror.state(),
        "storage ready"
    );
    if state.blobs.active_name().is_none() {
        warn!("no attachment provider configured, uploads will fail");
    }

    let worker = spawn_mirror_worker(
        state.mirror.clone(),
        state.store.clone(),
        events,
        worker_config,
    );
    let state = state.with_worker(worker.control());

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    output.message(&format!("Listening on http://{}", addr));
    info!(%addr, environment = %state.config.server.environment, "server started");

    let result = axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error");

    info!("shutting down, flushing mirror queue");
    worker.shutdown().await;
    result
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
