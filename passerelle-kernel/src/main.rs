/**
 * PASSERELLE KERNEL - Point d'entrée du serveur
 *
 * RÔLE : Bootstrap : .env, logs, config, répertoire de données, état partagé,
 * poller optionnel, puis API HTTP.
 */

use anyhow::Context;
use passerelle_kernel::config::load_config;
use passerelle_kernel::transport::SshShell;
use passerelle_kernel::{http, summary, AppState};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env optionnel
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = load_config().await;
    info!("target device {}@{}:{}", cfg.ssh.username, cfg.ssh.host, cfg.ssh.port);

    if let Err(e) = tokio::fs::create_dir_all(&cfg.data_dir).await {
        warn!("failed to create data dir {}: {}", cfg.data_dir.display(), e);
    }

    let app_state = AppState::new(&cfg, Arc::new(SshShell::new()));
    summary::spawn_summary_poller(app_state.clone(), cfg.telemetry.poll_interval_secs);

    let app = http::build_router(app_state);

    let listener = TcpListener::bind(cfg.listen)
        .await
        .with_context(|| format!("failed to bind {}", cfg.listen))?;
    info!("listening on http://{}", cfg.listen);
    axum::serve(listener, app).await.context("http server stopped")?;
    Ok(())
}
