//! Dashboard `/outbox` surface (section 6): read-only visibility into the
//! transactional outbox (`outbox.rs`) for diagnosing stuck or failed
//! WhatsApp deliveries. Nothing here mutates delivery state -- that only
//! happens through the lease/mark functions the worker calls.

use axum::extract::{Query, State};
use axum::middleware::from_fn_with_state;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::AppResult;
use crate::middleware::authz_mw::require_viewer;
use crate::repository::table_service::list_rows;
use crate::state::AppState;

pub fn router(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/outbox", get(list_outbox_events))
        .route_layer(from_fn_with_state(state.clone(), require_viewer))
}

#[derive(Debug, Deserialize)]
struct OutboxQuery {
    property_id: String,
    #[serde(default)]
    event_type: Option<String>,
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_limit() -> i64 {
    100
}

async fn list_outbox_events(State(state): State<AppState>, Query(query): Query<OutboxQuery>) -> AppResult<Json<Value>> {
    let mut filters = Map::new();
    filters.insert("property_id".to_string(), Value::String(query.property_id));
    if let Some(event_type) = query.event_type {
        filters.insert("event_type".to_string(), Value::String(event_type));
    }
    let rows = list_rows(
        &state.db_pool,
        "outbox_events",
        Some(&filters),
        query.limit.clamp(1, 1000),
        0,
        "created_at",
        false,
    )
    .await?;
    Ok(Json(Value::Array(rows)))
}
