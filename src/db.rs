//! Database connection pool setup.

use crate::config::Config;
use crate::error::Result;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

/// Publish and update requests carry a 10 s deadline; a connection acquire
/// that waits longer has already blown the caller's budget.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Create the connection pool. The ceiling comes from
/// `DATABASE_MAX_CONNECTIONS`; same-name writers serialize on advisory
/// locks anyway, so the floor only needs to keep the background tasks
/// (seed imports, reconcile, embedding upserts) off the connect path.
pub async fn create_pool(config: &Config) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .min_connections(2)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .idle_timeout(Duration::from_secs(600))
        .connect(&config.database_url)
        .await?;

    Ok(pool)
}

/// Run embedded schema migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
