mod api;
mod bootstrap;
mod health;

use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use fixflow_core::config::{AppConfig, LoadOptions};
use tower_http::trace::TraceLayer;

/// `RUST_LOG` wins over the configured level when set.
fn init_logging(config: &AppConfig) {
    use fixflow_core::config::LogFormat;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.to_ascii_lowercase()));
    let builder = tracing_subscriber::fmt().with_target(false).with_env_filter(filter);

    match config.logging.format {
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Pretty => builder.pretty().init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    let server = &app.config.server;
    let address = format!("{}:{}", server.bind_address, server.port);
    let graceful = Duration::from_secs(server.graceful_shutdown_secs);

    let domains = app
        .agent_runtime
        .router()
        .keys()
        .into_iter()
        .map(|key| key.as_str().to_string())
        .collect();

    let routes = Router::new()
        .merge(api::router(api::ApiState {
            runtime: app.agent_runtime.clone(),
            request_timeout: Duration::from_secs(server.request_timeout_secs),
        }))
        .merge(health::router(health::HealthState::new(app.db_pool.clone(), domains)))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        address = %address,
        "fixflow-server listening"
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let mut serve = tokio::spawn(async move {
        axum::serve(listener, routes)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    tokio::select! {
        joined = &mut serve => {
            joined.context("server task panicked")?.context("server stopped unexpectedly")?;
            return Ok(());
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for shutdown signal")?;
        }
    }

    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        grace_secs = graceful.as_secs(),
        "fixflow-server draining in-flight requests"
    );
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(graceful, serve).await {
        Ok(joined) => {
            joined.context("server task panicked")?.context("server shutdown failed")?;
        }
        Err(_) => {
            tracing::warn!(
                event_name = "system.server.shutdown_timeout",
                correlation_id = "shutdown",
                "grace period elapsed with requests still in flight"
            );
        }
    }

    app.db_pool.close().await;
    Ok(())
}
