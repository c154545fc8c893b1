//! Guest CRM profile upsert, deduplicated by email then phone within a
//! property, per the gate in the convert-hold transaction (section 4.4
//! step 6): a reservation must carry a `guest_id` before that transaction
//! commits.

use sqlx::PgConnection;

use crate::error::AppError;

pub struct GuestLookup<'a> {
    pub property_id: &'a str,
    pub guest_name: &'a str,
    pub email: Option<&'a str>,
    pub phone: Option<&'a str>,
}

/// Finds an existing guest by email, then by phone, creating a new profile
/// only if neither matches. Must run inside the caller's transaction so the
/// resulting id can be written onto the reservation atomically.
pub async fn upsert_guest(conn: &mut PgConnection, lookup: GuestLookup<'_>) -> Result<String, AppError> {
    if let Some(email) = lookup.email.filter(|e| !e.trim().is_empty()) {
        if let Some(id) = find_guest_by(conn, lookup.property_id, "email", email).await? {
            return Ok(id);
        }
    }
    if let Some(phone) = lookup.phone.filter(|p| !p.trim().is_empty()) {
        if let Some(id) = find_guest_by(conn, lookup.property_id, "phone", phone).await? {
            return Ok(id);
        }
    }

    let id: String = sqlx::query_scalar(
        "INSERT INTO guests (property_id, full_name, email, phone)
         VALUES ($1, $2, $3, $4)
         RETURNING id::text",
    )
    .bind(lookup.property_id)
    .bind(lookup.guest_name)
    .bind(lookup.email)
    .bind(lookup.phone)
    .fetch_one(conn)
    .await
    .map_err(AppError::from_sqlx)?;

    Ok(id)
}

async fn find_guest_by(
    conn: &mut PgConnection,
    property_id: &str,
    column: &str,
    value: &str,
) -> Result<Option<String>, AppError> {
    // `column` is never caller-controlled (only "email"/"phone" literals
    // from `upsert_guest` reach this function), so interpolating it is safe.
    let sql = format!(
        "SELECT id::text FROM guests WHERE property_id = $1 AND {column} = $2 LIMIT 1"
    );
    sqlx::query_scalar(&sql)
        .bind(property_id)
        .bind(value)
        .fetch_optional(conn)
        .await
        .map_err(AppError::from_sqlx)
}
