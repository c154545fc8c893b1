//! Dashboard guest CRM surface (section 6): thin `table_service` CRUD over
//! the `guests` table. Guest profile creation during booking is handled by
//! `domain::guests::upsert_guest` inside the hold/reservation transactions;
//! this module is for staff browsing and correcting contact details after
//! the fact.

use axum::extract::{Path, Query, State};
use axum::middleware::from_fn_with_state;
use axum::routing::{get, patch};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::AppResult;
use crate::middleware::authz_mw::{require_staff, require_viewer};
use crate::repository::table_service::{get_row, list_rows, update_row};
use crate::schemas::{remove_nulls, serialize_to_map, validate_input, GuestUpdateRequest};
use crate::state::AppState;

pub fn router(state: &AppState) -> Router<AppState> {
    let reads = Router::new()
        .route("/guests", get(list_guests))
        .route("/guests/{guest_id}", get(get_guest))
        .route_layer(from_fn_with_state(state.clone(), require_viewer));

    let writes = Router::new()
        .route("/guests/{guest_id}", patch(update_guest))
        .route_layer(from_fn_with_state(state.clone(), require_staff));

    Router::new().merge(reads).merge(writes)
}

#[derive(Debug, Deserialize)]
struct GuestsQuery {
    property_id: String,
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_limit() -> i64 {
    100
}

#[derive(Debug, Deserialize)]
struct GuestPath {
    guest_id: String,
}

#[derive(Debug, Deserialize)]
struct PropertyIdOnly {
    property_id: String,
}

async fn list_guests(
    State(state): State<AppState>,
    Query(query): Query<GuestsQuery>,
) -> AppResult<Json<Value>> {
    let mut filters = Map::new();
    filters.insert("property_id".to_string(), Value::String(query.property_id));
    let rows = list_rows(
        &state.db_pool,
        "guests",
        Some(&filters),
        query.limit.clamp(1, 1000),
        0,
        "created_at",
        false,
    )
    .await?;
    Ok(Json(Value::Array(rows)))
}

async fn get_guest(
    State(state): State<AppState>,
    Path(path): Path<GuestPath>,
    Query(query): Query<PropertyIdOnly>,
) -> AppResult<Json<Value>> {
    let row = get_row(&state.db_pool, "guests", &path.guest_id, "id").await?;
    let belongs = row
        .as_object()
        .and_then(|obj| obj.get("property_id"))
        .and_then(Value::as_str)
        .map(|value| value == query.property_id)
        .unwrap_or(false);
    if !belongs {
        return Err(crate::error::AppError::NotFound("guest not found".into()));
    }
    Ok(Json(row))
}

async fn update_guest(
    State(state): State<AppState>,
    Path(path): Path<GuestPath>,
    Query(query): Query<PropertyIdOnly>,
    Json(payload): Json<GuestUpdateRequest>,
) -> AppResult<Json<Value>> {
    validate_input(&payload)?;
    let existing = get_row(&state.db_pool, "guests", &path.guest_id, "id").await?;
    let belongs = existing
        .as_object()
        .and_then(|obj| obj.get("property_id"))
        .and_then(Value::as_str)
        .map(|value| value == query.property_id)
        .unwrap_or(false);
    if !belongs {
        return Err(crate::error::AppError::NotFound("guest not found".into()));
    }

    let patch = remove_nulls(serialize_to_map(&payload));
    let updated = update_row(&state.db_pool, "guests", &path.guest_id, &patch, "id").await?;
    Ok(Json(updated))
}
