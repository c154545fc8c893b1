//! Reservation lifecycle: pending_payment -> confirmed -> in_house ->
//! checked_out, plus cancellation, room assignment, and the central
//! room-overlap guard that backs the database's exclusion constraint.

use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use sqlx::{PgConnection, PgPool, Postgres, Row, Transaction};

use crate::db::with_transaction;
use crate::domain::ari;
use crate::error::AppError;
use crate::outbox;

/// Reservation statuses that consume or block a room (section 3 glossary).
pub const OPERATIONAL_STATUSES: &[&str] = &["confirmed", "in_house", "checked_out", "pending_payment"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationStatus {
    PendingPayment,
    Confirmed,
    Cancelled,
    InHouse,
    CheckedOut,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingPayment => "pending_payment",
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
            Self::InHouse => "in_house",
            Self::CheckedOut => "checked_out",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending_payment" => Some(Self::PendingPayment),
            "confirmed" => Some(Self::Confirmed),
            "cancelled" => Some(Self::Cancelled),
            "in_house" => Some(Self::InHouse),
            "checked_out" => Some(Self::CheckedOut),
            _ => None,
        }
    }
}

/// The reservation status transition table from section 4.6. Each arm
/// returns whether `(from, to)` is a legal transition; callers apply the
/// extra per-transition contract (role, required fields) themselves.
pub fn allowed_transition(from: ReservationStatus, to: ReservationStatus) -> bool {
    use ReservationStatus::*;
    matches!(
        (from, to),
        (PendingPayment, Confirmed)
            | (PendingPayment, Cancelled)
            | (Confirmed, InHouse)
            | (Confirmed, Cancelled)
            | (InHouse, CheckedOut)
    )
}

/// Central overlap guard (section 4.6): locks and checks for another
/// operational reservation in the same room whose stay overlaps
/// `[checkin, checkout)`. This is the application-layer guard; the
/// database's GiST exclusion constraint is the second, absolute one — if it
/// ever fires at runtime, the application let something through and that is
/// a SEV0, not a normal 409.
pub async fn assert_no_room_conflict<'a>(
    tx: &mut Transaction<'a, Postgres>,
    room_id: &str,
    checkin: NaiveDate,
    checkout: NaiveDate,
    exclude_reservation_id: Option<&str>,
) -> Result<(), AppError> {
    let statuses: Vec<&str> = OPERATIONAL_STATUSES.to_vec();
    let rows = sqlx::query(
        "SELECT id::text FROM reservations
         WHERE room_id = $1 AND status = ANY($2)
           AND checkin < $3 AND checkout > $4
           AND ($5::text IS NULL OR id::text <> $5)
         FOR UPDATE",
    )
    .bind(room_id)
    .bind(&statuses)
    .bind(checkout)
    .bind(checkin)
    .bind(exclude_reservation_id)
    .fetch_all(&mut **tx)
    .await
    .map_err(AppError::from_sqlx)?;

    if rows.is_empty() {
        Ok(())
    } else {
        Err(AppError::Conflict("room_conflict".into()))
    }
}

#[derive(Debug, Clone, Deserialize, validator::Validate)]
pub struct CreateManualReservationInput {
    #[validate(length(min = 1))]
    pub property_id: String,
    #[validate(length(min = 1))]
    pub room_type_id: String,
    pub checkin: NaiveDate,
    pub checkout: NaiveDate,
    #[validate(range(min = 0))]
    pub total_cents: i64,
    #[validate(length(equal = 3))]
    pub currency: String,
    #[validate(length(min = 1))]
    pub guest_id: String,
    #[validate(length(min = 1))]
    pub guest_name: String,
}

/// Staff-created manual reservation (section 4.6): `hold_id` is NULL,
/// status starts `pending_payment`, and inventory is booked directly in
/// the same transaction rather than going through a hold first.
pub async fn create_manual_reservation(
    pool: &PgPool,
    input: CreateManualReservationInput,
) -> Result<Result<String, ()>, AppError> {
    if input.checkout <= input.checkin {
        return Err(AppError::BadRequest("checkout must be after checkin".into()));
    }

    with_transaction(pool, |mut tx| {
        let input = input.clone();
        async move {
            let conn: &mut PgConnection = &mut tx;
            for date in ari::nights(input.checkin, input.checkout) {
                let booked = ari::try_book_night_directly(conn, &input.property_id, &input.room_type_id, date).await?;
                if !booked {
                    return Ok((tx, Err(())));
                }
            }

            let reservation_id: String = sqlx::query_scalar(
                "INSERT INTO reservations
                    (property_id, hold_id, room_type_id, checkin, checkout, total_cents,
                     currency, status, guest_id, guest_name)
                 VALUES ($1, NULL, $2, $3, $4, $5, $6, 'pending_payment', $7, $8)
                 RETURNING id::text",
            )
            .bind(&input.property_id)
            .bind(&input.room_type_id)
            .bind(input.checkin)
            .bind(input.checkout)
            .bind(input.total_cents)
            .bind(&input.currency)
            .bind(&input.guest_id)
            .bind(&input.guest_name)
            .fetch_one(&mut *conn)
            .await
            .map_err(AppError::from_sqlx)?;

            sqlx::query(
                "INSERT INTO reservation_status_logs (reservation_id, property_id, from_status, to_status, changed_by, notes)
                 VALUES ($1, $2, NULL, 'pending_payment', 'staff', 'Manual reservation created')",
            )
            .bind(&reservation_id)
            .bind(&input.property_id)
            .execute(&mut *conn)
            .await
            .map_err(AppError::from_sqlx)?;

            outbox::emit(
                conn,
                &input.property_id,
                "reservation.created",
                &serde_json::json!({ "reservation_id": reservation_id, "room_type_id": input.room_type_id }),
            )
            .await?;

            Ok((tx, Ok(reservation_id)))
        }
    })
    .await
}

pub struct TransitionContext<'a> {
    pub property_id: &'a str,
    pub reservation_id: &'a str,
    pub to: ReservationStatus,
    pub changed_by: &'a str,
    pub notes: &'a str,
    pub guarantee_justification: Option<&'a str>,
}

pub enum TransitionOutcome {
    Transitioned,
    AlreadyInTargetState,
}

/// Applies a reservation status transition and writes the matching
/// `reservation_status_logs` row in the same transaction, per the "no
/// orphans either way" testable property.
pub async fn transition_status(pool: &PgPool, ctx: TransitionContext<'_>) -> Result<TransitionOutcome, AppError> {
    let property_id = ctx.property_id.to_string();
    let reservation_id = ctx.reservation_id.to_string();
    let to = ctx.to;
    let changed_by = ctx.changed_by.to_string();
    let notes = ctx.notes.to_string();
    let guarantee_justification = ctx.guarantee_justification.map(ToOwned::to_owned);

    with_transaction(pool, |mut tx| {
        async move {
            let row = sqlx::query(
                "SELECT status, room_id, checkin, checkout FROM reservations WHERE id = $1 AND property_id = $2 FOR UPDATE",
            )
            .bind(&reservation_id)
            .bind(&property_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(AppError::from_sqlx)?
            .ok_or_else(|| AppError::NotFound("reservation not found".into()))?;

            let current: String = row.get("status");
            let current_status = ReservationStatus::parse(&current)
                .ok_or_else(|| AppError::Internal(format!("unknown reservation status {current}")))?;

            if current_status == to {
                return Ok((tx, TransitionOutcome::AlreadyInTargetState));
            }
            if !allowed_transition(current_status, to) {
                return Err(AppError::Conflict(format!(
                    "invalid transition {} -> {}",
                    current_status.as_str(),
                    to.as_str()
                )));
            }

            if to == ReservationStatus::InHouse {
                let room_id: Option<String> = row.get("room_id");
                let room_id = room_id.ok_or_else(|| AppError::Conflict("room_not_assigned".into()))?;
                let checkin: NaiveDate = row.get("checkin");
                let checkout: NaiveDate = row.get("checkout");
                if Utc::now().date_naive() < checkin {
                    return Err(AppError::Conflict("check_in_too_early".into()));
                }
                let governance: String = sqlx::query_scalar(
                    "SELECT governance_status FROM rooms WHERE property_id = $1 AND id = $2",
                )
                .bind(&property_id)
                .bind(&room_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(AppError::from_sqlx)?;
                if governance != "clean" {
                    return Err(AppError::Conflict("room_not_clean".into()));
                }
                assert_no_room_conflict(&mut tx, &room_id, checkin, checkout, Some(&reservation_id)).await?;
            }

            if to == ReservationStatus::CheckedOut {
                let balance: i64 = sqlx::query_scalar(
                    "SELECT total_cents - COALESCE((
                        SELECT SUM(amount_cents) FROM folio_payments
                        WHERE reservation_id = $1 AND status = 'captured'
                     ), 0) FROM reservations WHERE id = $1",
                )
                .bind(&reservation_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(AppError::from_sqlx)?;
                if balance != 0 {
                    return Err(AppError::Conflict("folio_balance_not_zero".into()));
                }
            }

            if to == ReservationStatus::Confirmed && guarantee_justification.is_none() && changed_by != "system" {
                return Err(AppError::UnprocessableEntity("guarantee_justification is required".into()));
            }

            let mut patch_guarantee = String::new();
            if let Some(justification) = &guarantee_justification {
                patch_guarantee = justification.clone();
            }

            sqlx::query(
                "UPDATE reservations SET status = $1,
                    guarantee_justification = CASE WHEN $2 <> '' THEN $2 ELSE guarantee_justification END
                 WHERE id = $3",
            )
            .bind(to.as_str())
            .bind(&patch_guarantee)
            .bind(&reservation_id)
            .execute(&mut *tx)
            .await
            .map_err(AppError::from_sqlx)?;

            if to == ReservationStatus::CheckedOut {
                let room_id: Option<String> = row.get("room_id");
                if let Some(room_id) = room_id {
                    sqlx::query("UPDATE rooms SET governance_status = 'dirty' WHERE property_id = $1 AND id = $2")
                        .bind(&property_id)
                        .bind(&room_id)
                        .execute(&mut *tx)
                        .await
                        .map_err(AppError::from_sqlx)?;
                }
            }

            if to == ReservationStatus::Cancelled {
                let room_type_id: String = sqlx::query_scalar(
                    "SELECT room_type_id FROM reservations WHERE id = $1",
                )
                .bind(&reservation_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(AppError::from_sqlx)?;
                let checkin: NaiveDate = row.get("checkin");
                let checkout: NaiveDate = row.get("checkout");
                let conn: &mut PgConnection = &mut tx;
                for date in ari::nights(checkin, checkout) {
                    ari::release_booked_night(conn, &property_id, &room_type_id, date).await?;
                }
            }

            sqlx::query(
                "INSERT INTO reservation_status_logs (reservation_id, property_id, from_status, to_status, changed_by, notes)
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(&reservation_id)
            .bind(&property_id)
            .bind(current_status.as_str())
            .bind(to.as_str())
            .bind(&changed_by)
            .bind(&notes)
            .execute(&mut *tx)
            .await
            .map_err(AppError::from_sqlx)?;

            outbox::emit(
                &mut *tx,
                &property_id,
                "reservation.status_changed",
                &serde_json::json!({ "reservation_id": reservation_id, "from": current_status.as_str(), "to": to.as_str() }),
            )
            .await?;

            Ok((tx, TransitionOutcome::Transitioned))
        }
    })
    .await
}

/// Assigns a physical room to a reservation (section 4.6): locks the
/// reservation, checks the room belongs to the right property/room type,
/// then re-runs the central overlap guard before writing `room_id` — the
/// GiST exclusion constraint is the backstop of last resort, not the
/// intended way a double-assignment gets caught.
pub async fn assign_room(
    pool: &PgPool,
    property_id: &str,
    reservation_id: &str,
    room_id: &str,
) -> Result<(), AppError> {
    let property_id = property_id.to_string();
    let reservation_id = reservation_id.to_string();
    let room_id = room_id.to_string();

    with_transaction(pool, |mut tx| {
        let property_id = property_id.clone();
        let reservation_id = reservation_id.clone();
        let room_id = room_id.clone();
        async move {
            let row = sqlx::query(
                "SELECT room_type_id, checkin, checkout FROM reservations
                 WHERE id = $1 AND property_id = $2 FOR UPDATE",
            )
            .bind(&reservation_id)
            .bind(&property_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(AppError::from_sqlx)?
            .ok_or_else(|| AppError::NotFound("reservation not found".into()))?;

            let room_type_id: String = row.get("room_type_id");
            let checkin: NaiveDate = row.get("checkin");
            let checkout: NaiveDate = row.get("checkout");

            let room_matches: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM rooms WHERE id = $1 AND property_id = $2 AND room_type_id = $3)",
            )
            .bind(&room_id)
            .bind(&property_id)
            .bind(&room_type_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(AppError::from_sqlx)?;
            if !room_matches {
                return Err(AppError::BadRequest(
                    "room does not belong to this property/room type".into(),
                ));
            }

            assert_no_room_conflict(&mut tx, &room_id, checkin, checkout, Some(&reservation_id)).await?;

            sqlx::query("UPDATE reservations SET room_id = $1 WHERE id = $2 AND property_id = $3")
                .bind(&room_id)
                .bind(&reservation_id)
                .bind(&property_id)
                .execute(&mut *tx)
                .await
                .map_err(AppError::from_sqlx)?;

            Ok((tx, ()))
        }
    })
    .await
}

/// Auto-confirm check: `sum(captured folio) / total_cents >=
/// confirmation_threshold`. Called after every folio payment capture.
pub fn auto_confirm_reached(captured_cents: i64, total_cents: i64, threshold: f64) -> bool {
    if total_cents <= 0 {
        return false;
    }
    (captured_cents as f64) / (total_cents as f64) >= threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_table_matches_section_4_6() {
        use ReservationStatus::*;
        assert!(allowed_transition(PendingPayment, Confirmed));
        assert!(allowed_transition(PendingPayment, Cancelled));
        assert!(allowed_transition(Confirmed, InHouse));
        assert!(allowed_transition(Confirmed, Cancelled));
        assert!(allowed_transition(InHouse, CheckedOut));
        assert!(!allowed_transition(PendingPayment, InHouse));
        assert!(!allowed_transition(CheckedOut, Confirmed));
        assert!(!allowed_transition(Cancelled, Confirmed));
    }

    #[test]
    fn auto_confirm_threshold() {
        assert!(auto_confirm_reached(30000, 30000, 1.0));
        assert!(!auto_confirm_reached(29999, 30000, 1.0));
        assert!(auto_confirm_reached(15000, 30000, 0.5));
    }
}
