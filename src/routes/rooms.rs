//! Dashboard `/rooms` surface (section 6): physical room inventory plus the
//! governance (housekeeping) status action a `CheckedOut` reservation
//! flips to `dirty` (see `domain::reservations::transition_status`).

use axum::extract::{Path, Query, State};
use axum::middleware::from_fn_with_state;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::error::{AppError, AppResult};
use crate::middleware::authz_mw::{require_governance, require_manager, require_viewer};
use crate::repository::table_service::{create_row, get_row, list_rows, update_row};
use crate::schemas::{validate_input, RoomGovernanceRequest, RoomUpsertRequest};
use crate::state::AppState;

pub fn router(state: &AppState) -> Router<AppState> {
    let reads = Router::new()
        .route("/rooms", get(list_rooms))
        .route("/rooms/{room_id}", get(get_room))
        .route_layer(from_fn_with_state(state.clone(), require_viewer));

    let governance = Router::new()
        .route("/rooms/{room_id}/governance", patch(set_governance))
        .route_layer(from_fn_with_state(state.clone(), require_governance));

    let writes = Router::new()
        .route("/rooms", post(create_room))
        .route_layer(from_fn_with_state(state.clone(), require_manager));

    Router::new().merge(reads).merge(governance).merge(writes)
}

#[derive(Debug, Deserialize)]
struct PropertyIdOnly {
    property_id: String,
}

#[derive(Debug, Deserialize)]
struct RoomPath {
    room_id: String,
}

async fn list_rooms(State(state): State<AppState>, Query(query): Query<PropertyIdOnly>) -> AppResult<Json<Value>> {
    let mut filters = Map::new();
    filters.insert("property_id".to_string(), Value::String(query.property_id));
    let rows = list_rows(&state.db_pool, "rooms", Some(&filters), 500, 0, "code", true).await?;
    Ok(Json(Value::Array(rows)))
}

async fn get_room(
    State(state): State<AppState>,
    Path(path): Path<RoomPath>,
    Query(query): Query<PropertyIdOnly>,
) -> AppResult<Json<Value>> {
    let row = get_row(&state.db_pool, "rooms", &path.room_id, "id").await?;
    require_owned_by(&row, &query.property_id)?;
    Ok(Json(row))
}

async fn create_room(
    State(state): State<AppState>,
    Query(query): Query<PropertyIdOnly>,
    Json(payload): Json<RoomUpsertRequest>,
) -> AppResult<Json<Value>> {
    validate_input(&payload)?;

    let room_type_matches: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM room_types WHERE id = $1 AND property_id = $2)",
    )
    .bind(&payload.room_type_id)
    .bind(&query.property_id)
    .fetch_one(&state.db_pool)
    .await
    .map_err(AppError::from_sqlx)?;
    if !room_type_matches {
        return Err(AppError::BadRequest("room_type does not belong to this property".into()));
    }

    let mut fields = Map::new();
    fields.insert("property_id".to_string(), json!(query.property_id));
    fields.insert("room_type_id".to_string(), json!(payload.room_type_id));
    fields.insert("code".to_string(), json!(payload.code));
    fields.insert("governance_status".to_string(), json!("clean"));
    let row = create_row(&state.db_pool, "rooms", &fields).await?;
    Ok(Json(row))
}

async fn set_governance(
    State(state): State<AppState>,
    Path(path): Path<RoomPath>,
    Query(query): Query<PropertyIdOnly>,
    Json(payload): Json<RoomGovernanceRequest>,
) -> AppResult<Json<Value>> {
    validate_input(&payload)?;
    let existing = get_row(&state.db_pool, "rooms", &path.room_id, "id").await?;
    require_owned_by(&existing, &query.property_id)?;

    let mut patch = Map::new();
    patch.insert("governance_status".to_string(), json!(payload.governance_status));
    let updated = update_row(&state.db_pool, "rooms", &path.room_id, &patch, "id").await?;
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
        Err(AppError::NotFound("room not found".into()))
    }
}
