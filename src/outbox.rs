//! Append-only domain event log, written inside the originating transaction,
//! plus the delivery-lease guard used by the WhatsApp send-response handler.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgConnection, PgPool, Row};

use crate::error::AppError;

/// Emits a PII-free domain event. Must be called from inside the same
/// transaction as the state change it describes — the event name is part
/// of the audit trail, not a side-channel notification.
pub async fn emit(
    conn: &mut PgConnection,
    property_id: &str,
    event_type: &str,
    payload: &Value,
) -> Result<String, AppError> {
    let id: String = sqlx::query_scalar(
        "INSERT INTO outbox_events (property_id, event_type, payload)
         VALUES ($1, $2, $3)
         RETURNING id::text",
    )
    .bind(property_id)
    .bind(event_type)
    .bind(payload)
    .fetch_one(conn)
    .await
    .map_err(AppError::from_sqlx)?;
    Ok(id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryLease {
    /// Acquired the lease; proceed to send.
    Acquired,
    /// Already sent; respond `already_sent` without re-sending.
    AlreadySent,
    /// Another attempt holds a fresh lease; let it finish or retry later.
    Held,
}

const LEASE_FRESHNESS_SECONDS: i64 = 60;

/// Attempts to take the delivery lease for `(property_id, outbox_event_id)`.
/// Mirrors the at-most-one-in-flight-attempt contract of section 4.9: a
/// `sending` row younger than 60s blocks a concurrent attempt, an older one
/// is assumed abandoned and is retaken.
pub async fn acquire_delivery_lease(
    pool: &PgPool,
    property_id: &str,
    outbox_event_id: &str,
) -> Result<DeliveryLease, AppError> {
    let existing = sqlx::query(
        "SELECT status, updated_at FROM outbox_deliveries
         WHERE property_id = $1 AND outbox_event_id = $2",
    )
    .bind(property_id)
    .bind(outbox_event_id)
    .fetch_optional(pool)
    .await
    .map_err(AppError::from_sqlx)?;

    if let Some(row) = &existing {
        let status: String = row.get("status");
        if status == "sent" {
            return Ok(DeliveryLease::AlreadySent);
        }
        if status == "sending" {
            let updated_at: DateTime<Utc> = row.get("updated_at");
            if (Utc::now() - updated_at).num_seconds() < LEASE_FRESHNESS_SECONDS {
                return Ok(DeliveryLease::Held);
            }
        }
    }

    sqlx::query(
        "INSERT INTO outbox_deliveries (property_id, outbox_event_id, status, attempt_count, updated_at)
         VALUES ($1, $2, 'sending', 1, now())
         ON CONFLICT (property_id, outbox_event_id)
         DO UPDATE SET status = 'sending',
                       attempt_count = outbox_deliveries.attempt_count + 1,
                       updated_at = now()
         WHERE outbox_deliveries.status <> 'sent'",
    )
    .bind(property_id)
    .bind(outbox_event_id)
    .execute(pool)
    .await
    .map_err(AppError::from_sqlx)?;

    Ok(DeliveryLease::Acquired)
}

pub async fn mark_sent(pool: &PgPool, property_id: &str, outbox_event_id: &str) -> Result<(), AppError> {
    sqlx::query(
        "UPDATE outbox_deliveries SET status = 'sent', sent_at = now(), updated_at = now()
         WHERE property_id = $1 AND outbox_event_id = $2",
    )
    .bind(property_id)
    .bind(outbox_event_id)
    .execute(pool)
    .await
    .map_err(AppError::from_sqlx)?;
    Ok(())
}

pub async fn mark_failed_permanent(
    pool: &PgPool,
    property_id: &str,
    outbox_event_id: &str,
    reason_code: &str,
) -> Result<(), AppError> {
    sqlx::query(
        "UPDATE outbox_deliveries
         SET status = 'failed_permanent', last_error = $3, updated_at = now()
         WHERE property_id = $1 AND outbox_event_id = $2",
    )
    .bind(property_id)
    .bind(outbox_event_id)
    .bind(reason_code)
    .execute(pool)
    .await
    .map_err(AppError::from_sqlx)?;
    Ok(())
}

/// Records a transient failure so the next retry can see `last_error`; the
/// error string is expected to already be sanitized of PII by the caller.
pub async fn mark_failed_transient(
    pool: &PgPool,
    property_id: &str,
    outbox_event_id: &str,
    sanitized_error: &str,
) -> Result<(), AppError> {
    sqlx::query(
        "UPDATE outbox_deliveries SET last_error = $3, updated_at = now()
         WHERE property_id = $1 AND outbox_event_id = $2",
    )
    .bind(property_id)
    .bind(outbox_event_id)
    .bind(sanitized_error)
    .execute(pool)
    .await
    .map_err(AppError::from_sqlx)?;
    Ok(())
}
