use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::ServiceExt;

use marcel_api::app::{self, AppState, RouteModules};
use marcel_api::config::{self, AppConfig};
use marcel_api::db;
use marcel_api::middleware::rate_limit::RateLimiter;
use marcel_observability::LogFormat;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // `.env` may set NODE_ENV, which picks the log format.
    let dotenv = config::load_dotenv();
    let config = AppConfig::from_env();

    marcel_observability::init(match &config {
        Ok(c) if c.environment.is_production() => LogFormat::Json,
        _ => LogFormat::Compact,
    });

    if let Err(e) = dotenv {
        tracing::warn!("failed to load .env: {e}");
    }
    let config = config.context("invalid configuration")?;

    let db = db::connect_from_config(&config).await?;

    let config = Arc::new(config);
    let state = AppState::new(config.clone(), db);
    spawn_rate_limit_sweeper(state.rate_limiter.clone());

    let app = app::build_app(state, RouteModules::new());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!(
        environment = %config.environment,
        "listening on {}",
        listener.local_addr()?
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    tracing::info!("server shutdown complete");
    Ok(())
}

fn spawn_rate_limit_sweeper(limiter: Arc<RateLimiter>) {
    let period = limiter.config().window;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // First tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = limiter.sweep();
            if removed > 0 {
                tracing::debug!(removed, remaining = limiter.tracked_clients(), "swept rate limit windows");
            }
        }
    });
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
