//! The ARI (Availability/Rates/Inventory) ledger: guarded per-night updates
//! that hold the `inv_total >= inv_booked + inv_held` invariant under
//! concurrency. Every function here returns the number of affected rows so
//! callers can detect contention and roll back the whole hold/convert/expire
//! transaction rather than leaving a partial mutation in place.

use chrono::NaiveDate;
use sqlx::{PgConnection, PgPool, Row};

use crate::error::AppError;

/// Read-only availability check for a single night, used by the quoting
/// engine before it commits to a price -- it must not lock the row, since
/// no mutation happens here.
pub async fn night_available(
    pool: &PgPool,
    property_id: &str,
    room_type_id: &str,
    date: NaiveDate,
) -> Result<i32, AppError> {
    let row = sqlx::query(
        "SELECT inv_total - inv_booked - inv_held AS available
         FROM ari_days WHERE property_id = $1 AND room_type_id = $2 AND date = $3",
    )
    .bind(property_id)
    .bind(room_type_id)
    .bind(date)
    .fetch_optional(pool)
    .await
    .map_err(AppError::from_sqlx)?;

    Ok(row.map(|row| row.get::<i32, _>("available")).unwrap_or(0))
}

/// Attempts to hold one unit of inventory for a single night. Returns
/// `true` if the guarded update affected exactly one row (the night was
/// actually available), `false` otherwise — the caller must treat `false`
/// as `no_inventory` and roll back every night reserved so far in this
/// hold, since no partial hold may persist.
pub async fn try_hold_night(
    conn: &mut PgConnection,
    property_id: &str,
    room_type_id: &str,
    date: NaiveDate,
) -> Result<bool, AppError> {
    let result = sqlx::query(
        "UPDATE ari_days
         SET inv_held = inv_held + 1
         WHERE property_id = $1 AND room_type_id = $2 AND date = $3
           AND inv_total >= inv_booked + inv_held + 1
           AND is_blocked = false",
    )
    .bind(property_id)
    .bind(room_type_id)
    .bind(date)
    .execute(conn)
    .await
    .map_err(AppError::from_sqlx)?;

    Ok(result.rows_affected() == 1)
}

/// Releases one held unit for a night. The `inv_held >= 1` guard prevents a
/// buggy replay from driving the counter negative even if it runs twice.
pub async fn release_held_night(
    conn: &mut PgConnection,
    property_id: &str,
    room_type_id: &str,
    date: NaiveDate,
) -> Result<bool, AppError> {
    let result = sqlx::query(
        "UPDATE ari_days
         SET inv_held = inv_held - 1
         WHERE property_id = $1 AND room_type_id = $2 AND date = $3 AND inv_held >= 1",
    )
    .bind(property_id)
    .bind(room_type_id)
    .bind(date)
    .execute(conn)
    .await
    .map_err(AppError::from_sqlx)?;

    Ok(result.rows_affected() == 1)
}

/// Converts one held unit into a booked unit for a night, atomically.
pub async fn convert_held_to_booked_night(
    conn: &mut PgConnection,
    property_id: &str,
    room_type_id: &str,
    date: NaiveDate,
) -> Result<bool, AppError> {
    let result = sqlx::query(
        "UPDATE ari_days
         SET inv_held = inv_held - 1, inv_booked = inv_booked + 1
         WHERE property_id = $1 AND room_type_id = $2 AND date = $3 AND inv_held >= 1",
    )
    .bind(property_id)
    .bind(room_type_id)
    .bind(date)
    .execute(conn)
    .await
    .map_err(AppError::from_sqlx)?;

    Ok(result.rows_affected() == 1)
}

/// Books inventory directly without an intermediate hold — the path used by
/// staff-created manual reservations, which start `pending_payment` but
/// consume inventory immediately.
pub async fn try_book_night_directly(
    conn: &mut PgConnection,
    property_id: &str,
    room_type_id: &str,
    date: NaiveDate,
) -> Result<bool, AppError> {
    let result = sqlx::query(
        "UPDATE ari_days
         SET inv_booked = inv_booked + 1
         WHERE property_id = $1 AND room_type_id = $2 AND date = $3
           AND inv_total >= inv_booked + inv_held + 1
           AND is_blocked = false",
    )
    .bind(property_id)
    .bind(room_type_id)
    .bind(date)
    .execute(conn)
    .await
    .map_err(AppError::from_sqlx)?;

    Ok(result.rows_affected() == 1)
}

pub async fn release_booked_night(
    conn: &mut PgConnection,
    property_id: &str,
    room_type_id: &str,
    date: NaiveDate,
) -> Result<bool, AppError> {
    let result = sqlx::query(
        "UPDATE ari_days SET inv_booked = inv_booked - 1
         WHERE property_id = $1 AND room_type_id = $2 AND date = $3 AND inv_booked >= 1",
    )
    .bind(property_id)
    .bind(room_type_id)
    .bind(date)
    .execute(conn)
    .await
    .map_err(AppError::from_sqlx)?;

    Ok(result.rows_affected() == 1)
}

/// Returns the half-open range of nights `[checkin, checkout)` in ascending
/// order — the canonical lock order every multi-night mutation iterates in
/// to avoid deadlocks among concurrent holds touching overlapping nights.
pub fn nights(checkin: NaiveDate, checkout: NaiveDate) -> Vec<NaiveDate> {
    let mut days = Vec::new();
    let mut cursor = checkin;
    while cursor < checkout {
        days.push(cursor);
        cursor = cursor.succ_opt().expect("date overflow");
    }
    days
}

#[cfg(test)]
mod tests {
    use super::nights;
    use chrono::NaiveDate;

    #[test]
    fn nights_is_half_open_and_ascending() {
        let checkin = NaiveDate::from_ymd_opt(2026, 4, 10).unwrap();
        let checkout = NaiveDate::from_ymd_opt(2026, 4, 13).unwrap();
        let days = nights(checkin, checkout);
        assert_eq!(
            days,
            vec![
                NaiveDate::from_ymd_opt(2026, 4, 10).unwrap(),
                NaiveDate::from_ymd_opt(2026, 4, 11).unwrap(),
                NaiveDate::from_ymd_opt(2026, 4, 12).unwrap(),
            ]
        );
    }

    #[test]
    fn single_night_stay() {
        let checkin = NaiveDate::from_ymd_opt(2026, 4, 10).unwrap();
        let checkout = NaiveDate::from_ymd_opt(2026, 4, 11).unwrap();
        assert_eq!(nights(checkin, checkout), vec![checkin]);
    }
}
