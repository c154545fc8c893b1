//! Dashboard `/occupancy` surface (section 4.7): a thin query wrapper over
//! `domain::availability::compute_occupancy`, grouped into a per-room-type
//! grid for the calendar view.

use axum::extract::{Query, State};
use axum::middleware::from_fn_with_state;
use axum::routing::get;
use axum::{Json, Router};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

use crate::domain::availability::compute_occupancy;
use crate::error::{AppError, AppResult};
use crate::middleware::authz_mw::require_viewer;
use crate::state::AppState;

pub fn router(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/occupancy", get(occupancy))
        .route("/occupancy/grid", get(occupancy_grid))
        .route_layer(from_fn_with_state(state.clone(), require_viewer))
}

#[derive(Debug, Deserialize)]
struct OccupancyQuery {
    property_id: String,
    start: NaiveDate,
    end: NaiveDate,
}

async fn occupancy(State(state): State<AppState>, Query(query): Query<OccupancyQuery>) -> AppResult<Json<Value>> {
    if query.end <= query.start {
        return Err(AppError::BadRequest("end must be after start".into()));
    }
    let days = compute_occupancy(&state.db_pool, &query.property_id, query.start, query.end).await?;
    Ok(Json(json!({ "data": days })))
}

/// Same data, reshaped as `{room_type_id: {date: {...}}}` for the
/// dashboard's calendar grid widget.
async fn occupancy_grid(State(state): State<AppState>, Query(query): Query<OccupancyQuery>) -> AppResult<Json<Value>> {
    if query.end <= query.start {
        return Err(AppError::BadRequest("end must be after start".into()));
    }
    let days = compute_occupancy(&state.db_pool, &query.property_id, query.start, query.end).await?;

    let mut grid: BTreeMap<String, Map<String, Value>> = BTreeMap::new();
    for day in days {
        let row = grid.entry(day.room_type_id.clone()).or_default();
        row.insert(
            day.date.to_string(),
            json!({ "inv_total": day.inv_total, "booked": day.booked, "held": day.held, "available": day.available }),
        );
    }
    Ok(Json(json!(grid)))
}
