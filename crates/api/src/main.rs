use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use tracklane_api::app::{build_app, services::build_services};
use tracklane_api::config::{Cli, Settings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(&cli)?;
    tracklane_observability::init(settings.log_format);

    let services = Arc::new(build_services(&settings)?);
    services.start_pool_maintenance().await;

    let app = build_app(Arc::clone(&services));
    let listener = tokio::net::TcpListener::bind(settings.listen)
        .await
        .with_context(|| format!("failed to bind {}", settings.listen))?;

    info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    services.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
