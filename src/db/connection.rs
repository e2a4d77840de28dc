use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

use crate::db::errors::{DatabaseError, Result};

/// Create the connection pool used by [`crate::db::PgStore`].
///
/// The pool is owned by the caller and shut down with [`close_pool`].
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    info!("Initializing database connection pool");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .min_connections(0)
        .acquire_timeout(Duration::from_secs(3))
        .idle_timeout(Duration::from_secs(60))
        .max_lifetime(Duration::from_secs(300))
        .test_before_acquire(true)
        .connect(database_url)
        .await
        .map_err(|e| DatabaseError::ConnectionError(format!("Failed to create pool: {}", e)))?;

    info!("Database connection pool initialized successfully");
    Ok(pool)
}

/// Create a pool from `DATABASE_URL`
pub async fn create_pool_from_env() -> Result<PgPool> {
    let database_url = std::env::var("DATABASE_URL").map_err(|_| {
        DatabaseError::ConnectionError("DATABASE_URL environment variable not set".to_string())
    })?;

    create_pool(&database_url).await
}

/// Apply the bundled schema migrations
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    info!("Database migrations applied");
    Ok(())
}

pub async fn close_pool(pool: &PgPool) {
    pool.close().await;
    info!("Database pool closed");
}

/// Health check for the database connection
pub async fn health_check(pool: &PgPool) -> Result<()> {
    sqlx::query("SELECT 1")
        .fetch_one(pool)
        .await
        .map_err(DatabaseError::QueryError)?;

    Ok(())
}

/// Execute a function with retry logic for handling transient errors
pub async fn with_retry<F, Fut, T>(max_retries: u8, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_retryable() && attempt < max_retries => {
                warn!(
                    attempt = attempt,
                    max_retries = max_retries,
                    error = %e,
                    "Retryable error occurred, retrying..."
                );

                // Exponential backoff with jitter
                let delay_ms = (50 * 2_u64.pow(attempt as u32 - 1)).min(1000) + jitter_ms();

                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
            Err(e) if e.is_retryable() => {
                return Err(DatabaseError::RetryLimitExceeded { attempts: max_retries });
            }
            Err(e) => return Err(e),
        }
    }
}

// 0-50ms
fn jitter_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::from(d.subsec_nanos()) % 50)
        .unwrap_or(0)
}
