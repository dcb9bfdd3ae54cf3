//! Database module

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, warn};

/// Create a database connection pool
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;

    Ok(pool)
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(pool).await?;
    info!("Database migrations complete");
    Ok(())
}

/// Startup reconciliation sweep: a run left in `importing` was orphaned by
/// a crashed worker and can never finish, so it is marked `failed`.
pub async fn reconcile_orphaned_runs(pool: &PgPool) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE import_runs
        SET status = 'failed',
            failure_reason = 'worker terminated mid-run',
            finished_at = NOW(),
            updated_at = NOW()
        WHERE status = 'importing'
        "#,
    )
    .execute(pool)
    .await?;

    let orphaned = result.rows_affected();
    if orphaned > 0 {
        warn!(orphaned, "marked orphaned import runs as failed");
    }
    Ok(orphaned)
}
