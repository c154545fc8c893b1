//! Idempotency substrate: processed-event receipts for externally sourced
//! events, and a response cache for client-facing mutating endpoints.
//! Unique constraints on the domain tables themselves are the third,
//! final line of defense and are handled at the call site (see
//! `AppError::is_unique_violation`).

use serde_json::Value;
use sqlx::{PgConnection, Row};

use crate::error::AppError;

/// Inserts a receipt for an externally sourced event as the first durable
/// effect of handling it. Returns `true` if this is the first time the
/// event has been seen, `false` if it was already processed (the caller
/// should then return a success-shaped no-op without doing anything else).
pub async fn receive_once(
    conn: &mut PgConnection,
    property_id: &str,
    source: &str,
    external_id: &str,
) -> Result<bool, AppError> {
    let result = sqlx::query(
        "INSERT INTO processed_events (property_id, source, external_id)
         VALUES ($1, $2, $3)
         ON CONFLICT (property_id, source, external_id) DO NOTHING",
    )
    .bind(property_id)
    .bind(source)
    .bind(external_id)
    .execute(conn)
    .await
    .map_err(AppError::from_sqlx)?;

    Ok(result.rows_affected() == 1)
}

/// A previously cached response for a replayed `Idempotency-Key`.
pub struct CachedResponse {
    pub status_code: i32,
    pub body: Value,
}

/// Looks up a cached response for `(idempotency_key, endpoint)`. The caller
/// replays it verbatim when present instead of re-running the handler.
pub async fn lookup_idempotency_key(
    conn: &mut PgConnection,
    idempotency_key: &str,
    endpoint: &str,
) -> Result<Option<CachedResponse>, AppError> {
    let row = sqlx::query(
        "SELECT status_code, response_body
         FROM idempotency_keys
         WHERE idempotency_key = $1 AND endpoint = $2",
    )
    .bind(idempotency_key)
    .bind(endpoint)
    .fetch_optional(conn)
    .await
    .map_err(AppError::from_sqlx)?;

    Ok(row.map(|row| CachedResponse {
        status_code: row.get("status_code"),
        body: row.get("response_body"),
    }))
}

/// Stores the response of a just-completed mutating call so future replays
/// of the same key are served from cache. Call this at commit time, inside
/// the same transaction as the mutation it is caching.
pub async fn store_idempotency_key(
    conn: &mut PgConnection,
    idempotency_key: &str,
    endpoint: &str,
    status_code: i32,
    body: &Value,
) -> Result<(), AppError> {
    sqlx::query(
        "INSERT INTO idempotency_keys (idempotency_key, endpoint, status_code, response_body)
         VALUES ($1, $2, $3, $4)
         ON CONFLICT (idempotency_key, endpoint) DO NOTHING",
    )
    .bind(idempotency_key)
    .bind(endpoint)
    .bind(status_code)
    .bind(body)
    .execute(conn)
    .await
    .map_err(AppError::from_sqlx)?;
    Ok(())
}

/// Builds the deterministic task name for a logical event, per section 4.8.
/// A "name already exists" response from the managed queue is treated as
/// success by the caller — the task was already enqueued.
pub fn task_name(kind: &str, key: &str) -> String {
    format!("{kind}:{key}")
}

#[cfg(test)]
mod tests {
    use super::task_name;

    #[test]
    fn task_name_is_deterministic() {
        assert_eq!(task_name("expire-hold", "h_1"), "expire-hold:h_1");
        assert_eq!(task_name("stripe", "evt_1"), "stripe:evt_1");
    }
}
