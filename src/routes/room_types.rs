//! Dashboard `/room_types` surface (section 6): thin `table_service` CRUD.
//! Pricing lives on `room_type_rates`, not here -- this is just the
//! inventory category (name, occupancy caps) a property's rooms belong to.

use axum::extract::{Path, Query, State};
use axum::middleware::from_fn_with_state;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::error::{AppError, AppResult};
use crate::middleware::authz_mw::{require_manager, require_viewer};
use crate::repository::table_service::{create_row, get_row, list_rows, update_row};
use crate::schemas::{remove_nulls, serialize_to_map, validate_input, RoomTypeUpsertRequest};
use crate::state::AppState;

pub fn router(state: &AppState) -> Router<AppState> {
    let reads = Router::new()
        .route("/room_types", get(list_room_types))
        .route("/room_types/{room_type_id}", get(get_room_type))
        .route_layer(from_fn_with_state(state.clone(), require_viewer));

    let writes = Router::new()
        .route("/room_types", post(create_room_type))
        .route("/room_types/{room_type_id}", patch(update_room_type))
        .route_layer(from_fn_with_state(state.clone(), require_manager));

    Router::new().merge(reads).merge(writes)
}

#[derive(Debug, Deserialize)]
struct PropertyIdOnly {
    property_id: String,
}

#[derive(Debug, Deserialize)]
struct RoomTypePath {
    room_type_id: String,
}

async fn list_room_types(
    State(state): State<AppState>,
    Query(query): Query<PropertyIdOnly>,
) -> AppResult<Json<Value>> {
    let mut filters = Map::new();
    filters.insert("property_id".to_string(), Value::String(query.property_id));
    let rows = list_rows(&state.db_pool, "room_types", Some(&filters), 200, 0, "name", true).await?;
    Ok(Json(Value::Array(rows)))
}

async fn get_room_type(
    State(state): State<AppState>,
    Path(path): Path<RoomTypePath>,
    Query(query): Query<PropertyIdOnly>,
) -> AppResult<Json<Value>> {
    let row = get_row(&state.db_pool, "room_types", &path.room_type_id, "id").await?;
    require_owned_by(&row, &query.property_id)?;
    Ok(Json(row))
}

async fn create_room_type(
    State(state): State<AppState>,
    Query(query): Query<PropertyIdOnly>,
    Json(payload): Json<RoomTypeUpsertRequest>,
) -> AppResult<Json<Value>> {
    validate_input(&payload)?;
    let mut fields = serialize_to_map(&payload);
    fields.insert("property_id".to_string(), json!(query.property_id));
    let row = create_row(&state.db_pool, "room_types", &fields).await?;
    Ok(Json(row))
}

async fn update_room_type(
    State(state): State<AppState>,
    Path(path): Path<RoomTypePath>,
    Query(query): Query<PropertyIdOnly>,
    Json(payload): Json<RoomTypeUpsertRequest>,
) -> AppResult<Json<Value>> {
    validate_input(&payload)?;
    let existing = get_row(&state.db_pool, "room_types", &path.room_type_id, "id").await?;
    require_owned_by(&existing, &query.property_id)?;

    let patch = remove_nulls(serialize_to_map(&payload));
    let updated = update_row(&state.db_pool, "room_types", &path.room_type_id, &patch, "id").await?;
    Ok(Json(updated))
}

fn require_owned_by(row: &Value, property_id: &str) -> AppResult<()> {
    let belongs = row
        .as_object()
        .and_then(|obj| obj.get("property_id"))
        .and_then(Value::as_str)
        .map(|value| value == property_id)
        .unwrap_or(false);
    if belongs {
        Ok(())
    } else {
        Err(AppError::NotFound("room_type not found".into()))
    }
}
