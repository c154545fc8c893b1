//! The inventory/holds engine (section 4.4): creates short-lived holds
//! against the ARI ledger, expires or cancels them, and converts paid holds
//! into reservations. Every multi-night mutation walks nights in
//! `(room_type_id, date ASC)` order (see `domain::ari::nights`) to keep a
//! canonical lock order across concurrent holds.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::json;
use sqlx::{PgConnection, PgPool, Postgres, Row, Transaction};
use validator::Validate;

use crate::db::with_transaction;
use crate::domain::ari;
use crate::domain::guests::{upsert_guest, GuestLookup};
use crate::error::AppError;
use crate::idempotency::{receive_once, task_name};
use crate::outbox;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateHoldInput {
    #[validate(length(min = 1))]
    pub property_id: String,
    pub conversation_id: Option<String>,
    #[validate(length(min = 1))]
    pub room_type_id: String,
    pub checkin: NaiveDate,
    pub checkout: NaiveDate,
    #[validate(range(min = 1, max = 4))]
    pub adult_count: i16,
    pub children_ages: Vec<i16>,
    #[validate(range(min = 0))]
    pub total_cents: i64,
    #[validate(length(equal = 3))]
    pub currency: String,
    #[validate(range(min = 1))]
    pub ttl_minutes: i64,
    #[validate(length(min = 1))]
    pub guest_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Hold {
    pub id: String,
    pub property_id: String,
    pub conversation_id: Option<String>,
    pub room_type_id: String,
    pub checkin: NaiveDate,
    pub checkout: NaiveDate,
    pub adult_count: i16,
    pub total_cents: i64,
    pub currency: String,
    pub status: String,
    pub expires_at: DateTime<Utc>,
    pub guest_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

pub enum CreateHoldOutcome {
    Created(Hold),
    Replayed(Hold),
    NoInventory,
}

fn validate_create_hold(input: &CreateHoldInput) -> Result<(), AppError> {
    if input.checkout <= input.checkin {
        return Err(AppError::BadRequest("checkout must be after checkin".into()));
    }
    if !(1..=4).contains(&input.adult_count) {
        return Err(AppError::BadRequest("adult_count must be between 1 and 4".into()));
    }
    for age in &input.children_ages {
        if !(0..=17).contains(age) {
            return Err(AppError::BadRequest("children_ages must be between 0 and 17".into()));
        }
    }
    Ok(())
}

pub async fn create_hold(pool: &PgPool, input: CreateHoldInput) -> Result<CreateHoldOutcome, AppError> {
    validate_create_hold(&input)?;

    if let Some(key) = input.idempotency_key.as_deref() {
        if let Some(existing) = find_hold_by_idempotency_key(pool, &input.property_id, key).await? {
            return Ok(CreateHoldOutcome::Replayed(existing));
        }
    }

    with_transaction(pool, |mut tx| {
        let input = input.clone();
        async move {
            let conn: &mut PgConnection = &mut tx;

            let insert_result = sqlx::query_as::<_, Hold>(
                "INSERT INTO holds
                    (property_id, conversation_id, room_type_id, checkin, checkout,
                     adult_count, children_ages, total_cents, currency, status,
                     expires_at, guest_name, email, phone, create_idempotency_key)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'active',
                         now() + ($10 || ' minutes')::interval, $11, $12, $13, $14)
                 RETURNING id::text, property_id, conversation_id, room_type_id,
                           checkin, checkout, adult_count, total_cents, currency,
                           status, expires_at, guest_name, email, phone",
            )
            .bind(&input.property_id)
            .bind(&input.conversation_id)
            .bind(&input.room_type_id)
            .bind(input.checkin)
            .bind(input.checkout)
            .bind(input.adult_count)
            .bind(serde_json::to_value(&input.children_ages).unwrap_or_default())
            .bind(input.total_cents)
            .bind(&input.currency)
            .bind(input.ttl_minutes.to_string())
            .bind(&input.guest_name)
            .bind(&input.email)
            .bind(&input.phone)
            .bind(&input.idempotency_key)
            .fetch_one(&mut *conn)
            .await;

            let hold = match insert_result {
                Ok(hold) => hold,
                Err(error) => {
                    if let Some(key) = input.idempotency_key.as_deref() {
                        if AppError::is_unique_violation(&error, "holds_property_id_create_idempotency_key_key") {
                            let existing = find_hold_by_idempotency_key_conn(conn, &input.property_id, key)
                                .await?
                                .ok_or_else(|| AppError::Internal("idempotency replay lookup missed the row it just conflicted on".into()))?;
                            return Ok((tx, CreateHoldOutcome::Replayed(existing)));
                        }
                    }
                    return Err(AppError::from_sqlx(error));
                }
            };

            for date in ari::nights(input.checkin, input.checkout) {
                sqlx::query(
                    "INSERT INTO hold_nights (hold_id, property_id, room_type_id, date, qty)
                     VALUES ($1, $2, $3, $4, 1)",
                )
                .bind(&hold.id)
                .bind(&input.property_id)
                .bind(&input.room_type_id)
                .bind(date)
                .execute(&mut *conn)
                .await
                .map_err(AppError::from_sqlx)?;

                let held = ari::try_hold_night(conn, &input.property_id, &input.room_type_id, date).await?;
                if !held {
                    // No partial hold may persist: dropping `tx` here rolls
                    // back every insert and guarded update done so far.
                    return Ok((tx, CreateHoldOutcome::NoInventory));
                }
            }

            outbox::emit(
                conn,
                &input.property_id,
                "hold.created",
                &json!({
                    "hold_id": hold.id,
                    "room_type_id": hold.room_type_id,
                    "checkin": hold.checkin,
                    "checkout": hold.checkout,
                    "adult_count": hold.adult_count,
                    "total_cents": hold.total_cents,
                    "currency": hold.currency,
                }),
            )
            .await?;

            Ok((tx, CreateHoldOutcome::Created(hold)))
        }
    })
    .await
}

async fn find_hold_by_idempotency_key(
    pool: &PgPool,
    property_id: &str,
    key: &str,
) -> Result<Option<Hold>, AppError> {
    sqlx::query_as::<_, Hold>(
        "SELECT id::text, property_id, conversation_id, room_type_id, checkin, checkout,
                adult_count, total_cents, currency, status, expires_at, guest_name, email, phone
         FROM holds WHERE property_id = $1 AND create_idempotency_key = $2",
    )
    .bind(property_id)
    .bind(key)
    .fetch_optional(pool)
    .await
    .map_err(AppError::from_sqlx)
}

async fn find_hold_by_idempotency_key_conn(
    conn: &mut PgConnection,
    property_id: &str,
    key: &str,
) -> Result<Option<Hold>, AppError> {
    sqlx::query_as::<_, Hold>(
        "SELECT id::text, property_id, conversation_id, room_type_id, checkin, checkout,
                adult_count, total_cents, currency, status, expires_at, guest_name, email, phone
         FROM holds WHERE property_id = $1 AND create_idempotency_key = $2",
    )
    .bind(property_id)
    .bind(key)
    .fetch_optional(conn)
    .await
    .map_err(AppError::from_sqlx)
}

async fn lock_hold<'a>(
    tx: &mut Transaction<'a, Postgres>,
    hold_id: &str,
) -> Result<Option<Hold>, AppError> {
    sqlx::query_as::<_, Hold>(
        "SELECT id::text, property_id, conversation_id, room_type_id, checkin, checkout,
                adult_count, total_cents, currency, status, expires_at, guest_name, email, phone
         FROM holds WHERE id = $1 FOR UPDATE",
    )
    .bind(hold_id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(AppError::from_sqlx)
}

async fn hold_nights(conn: &mut PgConnection, hold_id: &str) -> Result<Vec<(String, NaiveDate)>, AppError> {
    let rows = sqlx::query("SELECT room_type_id, date FROM hold_nights WHERE hold_id = $1 ORDER BY room_type_id, date ASC")
        .bind(hold_id)
        .fetch_all(conn)
        .await
        .map_err(AppError::from_sqlx)?;
    Ok(rows
        .into_iter()
        .map(|row| (row.get("room_type_id"), row.get("date")))
        .collect())
}

pub enum ExpireHoldOutcome {
    Expired,
    NoOp,
}

/// Triggered by a worker task whose deterministic name is
/// `expire-hold:{hold_id}`. Idempotent under at-least-once task delivery.
/// `property_id` comes from the task payload (section 6) so the receipt
/// dedupe can stay tenant-scoped like every other `processed_events` row.
pub async fn expire_hold(pool: &PgPool, property_id: &str, hold_id: &str) -> Result<ExpireHoldOutcome, AppError> {
    let name = task_name("expire-hold", hold_id);
    with_transaction(pool, |mut tx| {
        let hold_id = hold_id.to_string();
        let property_id = property_id.to_string();
        async move {
            let conn: &mut PgConnection = &mut tx;
            let first_time = receive_once(conn, &property_id, "tasks", &name).await?;
            if !first_time {
                return Ok((tx, ExpireHoldOutcome::NoOp));
            }

            let hold = lock_hold(&mut tx, &hold_id).await?;
            let Some(hold) = hold else {
                return Ok((tx, ExpireHoldOutcome::NoOp));
            };
            if hold.status != "active" || hold.expires_at > Utc::now() {
                return Ok((tx, ExpireHoldOutcome::NoOp));
            }

            let conn: &mut PgConnection = &mut tx;
            sqlx::query("UPDATE holds SET status = 'expired' WHERE id = $1")
                .bind(&hold.id)
                .execute(&mut *conn)
                .await
                .map_err(AppError::from_sqlx)?;

            for (room_type_id, date) in hold_nights(conn, &hold.id).await? {
                ari::release_held_night(conn, &hold.property_id, &room_type_id, date).await?;
            }

            outbox::emit(conn, &hold.property_id, "hold.expired", &json!({ "hold_id": hold.id })).await?;

            Ok((tx, ExpireHoldOutcome::Expired))
        }
    })
    .await
}

pub enum CancelHoldOutcome {
    Cancelled,
    NoOp,
}

/// Same shape as `expire_hold`; whether a `pending_refund` is inserted is
/// decided by the caller from the property's cancellation policy before
/// calling this, since the policy lookup does not require the hold lock.
pub async fn cancel_hold(
    pool: &PgPool,
    hold_id: &str,
    insert_pending_refund_cents: Option<i64>,
) -> Result<CancelHoldOutcome, AppError> {
    with_transaction(pool, |mut tx| {
        let hold_id = hold_id.to_string();
        async move {
            let hold = lock_hold(&mut tx, &hold_id).await?;
            let Some(hold) = hold else {
                return Ok((tx, CancelHoldOutcome::NoOp));
            };
            if hold.status != "active" {
                return Ok((tx, CancelHoldOutcome::NoOp));
            }

            let conn: &mut PgConnection = &mut tx;
            sqlx::query("UPDATE holds SET status = 'cancelled' WHERE id = $1")
                .bind(&hold.id)
                .execute(&mut *conn)
                .await
                .map_err(AppError::from_sqlx)?;

            for (room_type_id, date) in hold_nights(conn, &hold.id).await? {
                ari::release_held_night(conn, &hold.property_id, &room_type_id, date).await?;
            }

            if let Some(refund_cents) = insert_pending_refund_cents {
                sqlx::query(
                    "INSERT INTO pending_refunds (property_id, hold_id, amount_cents, status)
                     VALUES ($1, $2, $3, 'pending')",
                )
                .bind(&hold.property_id)
                .bind(&hold.id)
                .bind(refund_cents)
                .execute(&mut *conn)
                .await
                .map_err(AppError::from_sqlx)?;
            }

            outbox::emit(conn, &hold.property_id, "hold.cancelled", &json!({ "hold_id": hold.id })).await?;

            Ok((tx, CancelHoldOutcome::Cancelled))
        }
    })
    .await
}

pub enum ConvertHoldOutcome {
    AlreadyProcessed,
    HoldNotActive,
    NeedsManual,
    Converted { reservation_id: String },
}

pub struct ConvertHoldInput<'a> {
    pub property_id: &'a str,
    pub stripe_event_id: &'a str,
    pub provider_object_id: &'a str,
    pub hold_id: &'a str,
    pub amount_cents: i64,
}

/// Runs the payment→reservation conversion transaction (section 4.4). This
/// is the single place `inv_held` moves to `inv_booked` via payment.
pub async fn convert_hold(pool: &PgPool, input: ConvertHoldInput<'_>) -> Result<ConvertHoldOutcome, AppError> {
    with_transaction(pool, |mut tx| {
        let property_id = input.property_id.to_string();
        let stripe_event_id = input.stripe_event_id.to_string();
        let provider_object_id = input.provider_object_id.to_string();
        let hold_id = input.hold_id.to_string();
        let amount_cents = input.amount_cents;
        async move {
            let conn: &mut PgConnection = &mut tx;
            let first_time = receive_once(conn, &property_id, "stripe", &stripe_event_id).await?;
            if !first_time {
                return Ok((tx, ConvertHoldOutcome::AlreadyProcessed));
            }

            let conn: &mut PgConnection = &mut tx;
            sqlx::query(
                "INSERT INTO payments (property_id, provider, provider_object_id, amount_cents, status)
                 VALUES ($1, 'stripe', $2, $3, 'succeeded')
                 ON CONFLICT (property_id, provider, provider_object_id)
                 DO UPDATE SET status = 'succeeded', amount_cents = EXCLUDED.amount_cents",
            )
            .bind(&property_id)
            .bind(&provider_object_id)
            .bind(amount_cents)
            .execute(&mut *conn)
            .await
            .map_err(AppError::from_sqlx)?;

            let hold = lock_hold(&mut tx, &hold_id).await?;
            let Some(hold) = hold else {
                return Ok((tx, ConvertHoldOutcome::HoldNotActive));
            };
            if hold.status != "active" {
                return Ok((tx, ConvertHoldOutcome::HoldNotActive));
            }

            if Utc::now() > hold.expires_at {
                let conn: &mut PgConnection = &mut tx;
                sqlx::query(
                    "UPDATE payments SET status = 'needs_manual'
                     WHERE property_id = $1 AND provider = 'stripe' AND provider_object_id = $2",
                )
                .bind(&property_id)
                .bind(&provider_object_id)
                .execute(&mut *conn)
                .await
                .map_err(AppError::from_sqlx)?;

                outbox::emit(
                    conn,
                    &property_id,
                    "payment.late",
                    &json!({ "hold_id": hold.id, "provider_object_id": provider_object_id }),
                )
                .await?;

                return Ok((tx, ConvertHoldOutcome::NeedsManual));
            }

            let conn: &mut PgConnection = &mut tx;
            for (room_type_id, date) in hold_nights(conn, &hold.id).await? {
                let converted = ari::convert_held_to_booked_night(conn, &hold.property_id, &room_type_id, date).await?;
                if !converted {
                    return Err(AppError::InvariantViolation(format!(
                        "hold {} night {room_type_id}/{date} could not move held->booked",
                        hold.id
                    )));
                }
            }

            let guest_id = upsert_guest(
                conn,
                GuestLookup {
                    property_id: &hold.property_id,
                    guest_name: &hold.guest_name,
                    email: hold.email.as_deref(),
                    phone: hold.phone.as_deref(),
                },
            )
            .await?;

            let reservation_id: Option<String> = sqlx::query_scalar(
                "INSERT INTO reservations
                    (property_id, hold_id, room_type_id, checkin, checkout, total_cents,
                     currency, status, guest_id, guest_name)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, 'confirmed', $8, $9)
                 ON CONFLICT (property_id, hold_id) DO NOTHING
                 RETURNING id::text",
            )
            .bind(&hold.property_id)
            .bind(&hold.id)
            .bind(&hold.room_type_id)
            .bind(hold.checkin)
            .bind(hold.checkout)
            .bind(hold.total_cents)
            .bind(&hold.currency)
            .bind(&guest_id)
            .bind(&hold.guest_name)
            .fetch_optional(&mut *conn)
            .await
            .map_err(AppError::from_sqlx)?;

            let reservation_id = match reservation_id {
                Some(id) => id,
                None => {
                    // (property_id, hold_id) already had a reservation —
                    // treat as success, per the unique-constraint guard.
                    let id: String = sqlx::query_scalar(
                        "SELECT id::text FROM reservations WHERE property_id = $1 AND hold_id = $2",
                    )
                    .bind(&hold.property_id)
                    .bind(&hold.id)
                    .fetch_one(&mut *conn)
                    .await
                    .map_err(AppError::from_sqlx)?;
                    id
                }
            };

            sqlx::query("UPDATE holds SET status = 'converted' WHERE id = $1")
                .bind(&hold.id)
                .execute(&mut *conn)
                .await
                .map_err(AppError::from_sqlx)?;

            sqlx::query(
                "INSERT INTO reservation_status_logs (reservation_id, property_id, from_status, to_status, changed_by, notes)
                 VALUES ($1, $2, NULL, 'confirmed', 'system', 'Payment received')
                 ON CONFLICT DO NOTHING",
            )
            .bind(&reservation_id)
            .bind(&hold.property_id)
            .execute(&mut *conn)
            .await
            .map_err(AppError::from_sqlx)?;

            outbox::emit(
                conn,
                &hold.property_id,
                "payment.succeeded",
                &json!({ "hold_id": hold.id, "provider_object_id": provider_object_id, "amount_cents": amount_cents }),
            )
            .await?;
            outbox::emit(
                conn,
                &hold.property_id,
                "reservation.confirmed",
                &json!({ "reservation_id": reservation_id, "hold_id": hold.id }),
            )
            .await?;

            Ok((tx, ConvertHoldOutcome::Converted { reservation_id }))
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_create_hold_rejects_bad_dates() {
        let input = CreateHoldInput {
            property_id: "p1".into(),
            conversation_id: None,
            room_type_id: "rt1".into(),
            checkin: NaiveDate::from_ymd_opt(2026, 4, 11).unwrap(),
            checkout: NaiveDate::from_ymd_opt(2026, 4, 10).unwrap(),
            adult_count: 2,
            children_ages: vec![],
            total_cents: 1000,
            currency: "USD".into(),
            ttl_minutes: 30,
            guest_name: "Jane".into(),
            email: None,
            phone: None,
            idempotency_key: None,
        };
        assert!(validate_create_hold(&input).is_err());
    }

    #[test]
    fn validate_create_hold_rejects_bad_occupancy() {
        let mut input = CreateHoldInput {
            property_id: "p1".into(),
            conversation_id: None,
            room_type_id: "rt1".into(),
            checkin: NaiveDate::from_ymd_opt(2026, 4, 10).unwrap(),
            checkout: NaiveDate::from_ymd_opt(2026, 4, 11).unwrap(),
            adult_count: 5,
            children_ages: vec![],
            total_cents: 1000,
            currency: "USD".into(),
            ttl_minutes: 30,
            guest_name: "Jane".into(),
            email: None,
            phone: None,
            idempotency_key: None,
        };
        assert!(validate_create_hold(&input).is_err());
        input.adult_count = 2;
        input.children_ages = vec![18];
        assert!(validate_create_hold(&input).is_err());
    }
}
