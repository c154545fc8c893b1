//! Dashboard `/pending_refunds` surface (section 6): refunds queued by
//! `domain::holds::cancel_hold` when a cancelled hold had already been
//! paid. Staff work the queue by hand against the payment provider and
//! record the outcome here; nothing in this crate calls the provider's
//! refund API directly.

use axum::extract::{Path, Query, State};
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::error::{AppError, AppResult};
use crate::middleware::authz_mw::{require_staff, require_viewer};
use crate::repository::table_service::{get_row, list_rows, update_row};
use crate::schemas::{validate_input, PendingRefundActionRequest};
use crate::state::AppState;

pub fn router(state: &AppState) -> Router<AppState> {
    let reads = Router::new()
        .route("/pending_refunds", get(list_pending_refunds))
        .route_layer(from_fn_with_state(state.clone(), require_viewer));

    let writes = Router::new()
        .route("/pending_refunds/{refund_id}/actions/set-status", post(set_status))
        .route_layer(from_fn_with_state(state.clone(), require_staff));

    Router::new().merge(reads).merge(writes)
}

#[derive(Debug, Deserialize)]
struct PropertyIdOnly {
    property_id: String,
}

#[derive(Debug, Deserialize)]
struct RefundPath {
    refund_id: String,
}

async fn list_pending_refunds(
    State(state): State<AppState>,
    Query(query): Query<PropertyIdOnly>,
) -> AppResult<Json<Value>> {
    let mut filters = Map::new();
    filters.insert("property_id".to_string(), Value::String(query.property_id));
    let rows = list_rows(&state.db_pool, "pending_refunds", Some(&filters), 200, 0, "created_at", false).await?;
    Ok(Json(Value::Array(rows)))
}

async fn set_status(
    State(state): State<AppState>,
    Path(path): Path<RefundPath>,
    Query(query): Query<PropertyIdOnly>,
    Json(payload): Json<PendingRefundActionRequest>,
) -> AppResult<Json<Value>> {
    validate_input(&payload)?;
    let existing = get_row(&state.db_pool, "pending_refunds", &path.refund_id, "id").await?;
    let belongs = existing
        .as_object()
        .and_then(|obj| obj.get("property_id"))
        .and_then(Value::as_str)
        .map(|value| value == query.property_id)
        .unwrap_or(false);
    if !belongs {
        return Err(AppError::NotFound("pending refund not found".into()));
    }

    let mut patch = Map::new();
    patch.insert("status".to_string(), json!(payload.status));
    let updated = update_row(&state.db_pool, "pending_refunds", &path.refund_id, &patch, "id").await?;
    Ok(Json(updated))
}
