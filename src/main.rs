use anyhow::Context;
use std::net::SocketAddr;

use tenanthub_api::app::{self, AppState};
use tenanthub_api::config::ConfigLoader;
use tenanthub_api::diagnostics::ServiceState;
use tenanthub_api::logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so cargo run picks up JWT_SECRET, APP_ENV, etc.
    let _ = dotenvy::dotenv();
    logging::init("info");

    let loader = ConfigLoader::from_process_env();
    let loaded = match loader.load().await {
        Ok(loaded) => loaded,
        Err(e) => {
            tracing::error!(error = %e, "Refusing to start without a usable configuration");
            std::process::exit(1);
        }
    };

    // Allow tests or deployments to override port via env
    let port = loader
        .env()
        .non_empty("PORT")
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(loaded.config.server.port);
    let host = loaded.config.server.host.clone();
    tracing::info!(profile = %loaded.config.profile, "Starting TenantHub API");

    let state = AppState::bootstrap(loaded).await;
    tracing::debug!(providers = ?state.diagnostics.names().await, "Diagnostic providers registered");

    for status in state.diagnostics.all_statuses().await {
        let reason = status.reason.as_deref().unwrap_or("-");
        match status.status {
            ServiceState::Ready => tracing::info!(service = %status.name, "Startup check: ready"),
            ServiceState::Degraded => {
                tracing::warn!(service = %status.name, %reason, "Startup check: degraded")
            }
            ServiceState::Unavailable => {
                tracing::warn!(service = %status.name, %reason, "Startup check: unavailable")
            }
        }
    }

    let bind_addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;

    tracing::info!("TenantHub API listening on http://{}", bind_addr);

    axum::serve(
        listener,
        app::router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("server error")
}
