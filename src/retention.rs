//! Daily cleanup job (section 4.12): deletes rows from the idempotency
//! substrate past their retention window. Idempotent and safe to re-run --
//! every delete is a plain `WHERE age > N`, so a missed or repeated run
//! just catches up. Logs counts only, never row contents.

use sqlx::PgPool;

use crate::config::AppConfig;
use crate::error::AppError;

pub struct RetentionCounts {
    pub processed_events_deleted: u64,
    pub outbox_events_deleted: u64,
    pub idempotency_keys_deleted: u64,
}

pub async fn run_once(pool: &PgPool, config: &AppConfig) -> Result<RetentionCounts, AppError> {
    let processed_events_deleted = sqlx::query(
        "DELETE FROM processed_events WHERE received_at < now() - ($1 || ' days')::interval",
    )
    .bind(config.retention_processed_events_days.to_string())
    .execute(pool)
    .await
    .map_err(AppError::from_sqlx)?
    .rows_affected();

    let outbox_events_deleted = sqlx::query(
        "DELETE FROM outbox_events WHERE created_at < now() - ($1 || ' days')::interval",
    )
    .bind(config.retention_outbox_events_days.to_string())
    .execute(pool)
    .await
    .map_err(AppError::from_sqlx)?
    .rows_affected();

    let idempotency_keys_deleted = sqlx::query(
        "DELETE FROM idempotency_keys
         WHERE (expires_at IS NOT NULL AND expires_at < now())
            OR (expires_at IS NULL AND created_at < now() - ($1 || ' days')::interval)",
    )
    .bind(config.retention_idempotency_keys_days.to_string())
    .execute(pool)
    .await
    .map_err(AppError::from_sqlx)?
    .rows_affected();

    tracing::info!(
        processed_events_deleted,
        outbox_events_deleted,
        idempotency_keys_deleted,
        "retention_sweep_completed"
    );

    Ok(RetentionCounts {
        processed_events_deleted,
        outbox_events_deleted,
        idempotency_keys_deleted,
    })
}
