use std::future::Future;

use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};

use crate::error::AppError;

pub async fn build_pool(database_url: &str, max_connections: u32) -> Result<PgPool, AppError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .map_err(|error| AppError::Dependency(format!("could not connect to database: {error}")))?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|error| AppError::Dependency(format!("migration failed: {error}")))?;

    Ok(pool)
}

/// Runs `work` inside a single database transaction: opens a connection,
/// issues `BEGIN`, commits on `Ok`, rolls back on `Err` or panic, and always
/// returns the connection to the pool. Any domain function that mutates more
/// than one table must be invoked through this scope rather than taking a
/// bare `&PgPool` — that's the gate the code-review/lint rule enforces.
pub async fn with_transaction<F, Fut, T>(pool: &PgPool, work: F) -> Result<T, AppError>
where
    F: FnOnce(Transaction<'static, Postgres>) -> Fut,
    Fut: Future<Output = Result<(Transaction<'static, Postgres>, T), AppError>>,
{
    let tx = pool
        .begin()
        .await
        .map_err(|error| AppError::from_sqlx(error))?;

    match work(tx).await {
        Ok((tx, value)) => {
            tx.commit()
                .await
                .map_err(|error| AppError::from_sqlx(error))?;
            Ok(value)
        }
        Err(error) => Err(error),
    }
}
