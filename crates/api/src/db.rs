//! Postgres connection pool for route groups that persist data.

use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};
use thiserror::Error;

use crate::config::AppConfig;

const MAX_CONNECTIONS: u32 = 10;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum DbError {
    #[error("failed to connect to database: {0}")]
    Connect(#[from] sqlx::Error),
}

pub async fn connect(database_url: &str) -> Result<PgPool, DbError> {
    let pool = PgPoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Connect when the environment wants a database and a URL is configured.
///
/// Test environments never connect; a missing URL only warns.
pub async fn connect_from_config(config: &AppConfig) -> Result<Option<PgPool>, DbError> {
    if !config.database_enabled() {
        tracing::debug!("database disabled for {} environment", config.environment);
        return Ok(None);
    }

    let Some(url) = config.database_url.as_deref() else {
        tracing::warn!("DATABASE_URL not set; running without a database");
        return Ok(None);
    };

    let pool = connect(url).await?;
    tracing::info!("database connected");
    Ok(Some(pool))
}
