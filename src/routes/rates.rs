//! Dashboard `/rates` surface (section 6): per-room-type, per-date pricing
//! and availability controls (`domain::quote::compute_quote` reads exactly
//! these columns). One row per `(property_id, room_type_id, date)`.

use axum::extract::{Path, Query, State};
use axum::middleware::from_fn_with_state;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::error::{AppError, AppResult};
use crate::middleware::authz_mw::{require_manager, require_viewer};
use crate::repository::table_service::{create_row, get_row, list_rows, update_row};
use crate::schemas::{remove_nulls, serialize_to_map, validate_input, RateUpsertRequest};
use crate::state::AppState;

pub fn router(state: &AppState) -> Router<AppState> {
    let reads = Router::new()
        .route("/rates", get(list_rates))
        .route_layer(from_fn_with_state(state.clone(), require_viewer));

    let writes = Router::new()
        .route("/rates", post(create_rate))
        .route("/rates/{rate_id}", patch(update_rate))
        .route_layer(from_fn_with_state(state.clone(), require_manager));

    Router::new().merge(reads).merge(writes)
}

#[derive(Debug, Deserialize)]
struct RatesQuery {
    property_id: String,
    room_type_id: String,
}

#[derive(Debug, Deserialize)]
struct RatePath {
    rate_id: String,
}

#[derive(Debug, Deserialize)]
struct PropertyIdOnly {
    property_id: String,
}

async fn list_rates(State(state): State<AppState>, Query(query): Query<RatesQuery>) -> AppResult<Json<Value>> {
    let mut filters = Map::new();
    filters.insert("property_id".to_string(), Value::String(query.property_id));
    filters.insert("room_type_id".to_string(), Value::String(query.room_type_id));
    let rows = list_rows(&state.db_pool, "room_type_rates", Some(&filters), 400, 0, "date", true).await?;
    Ok(Json(Value::Array(rows)))
}

async fn create_rate(
    State(state): State<AppState>,
    Query(query): Query<RatesQuery>,
    Json(payload): Json<RateUpsertRequest>,
) -> AppResult<Json<Value>> {
    validate_input(&payload)?;
    let mut fields = serialize_to_map(&payload);
    fields.insert("property_id".to_string(), json!(query.property_id));
    fields.insert("room_type_id".to_string(), json!(query.room_type_id));
    let row = create_row(&state.db_pool, "room_type_rates", &fields).await?;
    Ok(Json(row))
}

async fn update_rate(
    State(state): State<AppState>,
    Path(path): Path<RatePath>,
    Query(query): Query<PropertyIdOnly>,
    Json(payload): Json<RateUpsertRequest>,
) -> AppResult<Json<Value>> {
    validate_input(&payload)?;
    let existing = get_row(&state.db_pool, "room_type_rates", &path.rate_id, "id").await?;
    let belongs = existing
        .as_object()
        .and_then(|obj| obj.get("property_id"))
        .and_then(Value::as_str)
        .map(|value| value == query.property_id)
        .unwrap_or(false);
    if !belongs {
        return Err(AppError::NotFound("rate not found".into()));
    }

    let patch = remove_nulls(serialize_to_map(&payload));
    let updated = update_row(&state.db_pool, "room_type_rates", &path.rate_id, &patch, "id").await?;
    Ok(Json(updated))
}
