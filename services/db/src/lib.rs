//! Shared database plumbing for the Dubai population services
//!
//! - Connection settings from the environment (`DbConfig`)
//! - Bounded, fixed-delay retry for the connection bootstrap (`RetryPolicy`)
//! - Schema-qualified table names used by the loader and the API

pub mod config;
pub mod retry;
pub mod schema;

pub use config::DbConfig;
pub use retry::RetryPolicy;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Build the connection pool, retrying the first connection per `policy`.
///
/// The pool is created once by the binary and handed to every component
/// that needs it.
pub async fn connect(config: &DbConfig, policy: &RetryPolicy) -> Result<PgPool> {
    tracing::info!(url = %config.redacted_url(), "connecting to database");

    let pool = policy
        .run("database connect", || {
            PgPoolOptions::new()
                .max_connections(config.max_connections)
                .connect(&config.url)
        })
        .await
        .context("Failed to connect to database")?;

    tracing::info!("database connected");
    Ok(pool)
}

/// Cheap round trip used by health checks.
pub async fn ping(pool: &PgPool) -> Result<()> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .context("Database ping failed")?;
    Ok(())
}
