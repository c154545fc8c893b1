//! Dashboard/guest-facing hold surface (section 4.4): manual hold creation
//! for staff taking a booking over the phone, and cancellation. The
//! WhatsApp-originated path creates holds from `routes::tasks` directly,
//! not through here.

use axum::extract::{Path, Query, State};
use axum::middleware::from_fn_with_state;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::domain::holds::{self, CancelHoldOutcome, CreateHoldInput, CreateHoldOutcome};
use crate::error::{AppError, AppResult};
use crate::middleware::authz_mw::require_staff;
use crate::schemas::validate_input;
use crate::state::AppState;

pub fn router(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/holds", post(create_hold))
        .route("/holds/{hold_id}/actions/cancel", post(cancel_hold))
        .route_layer(from_fn_with_state(state.clone(), require_staff))
}

#[derive(Debug, Deserialize)]
struct HoldPath {
    hold_id: String,
}

#[derive(Debug, Deserialize)]
struct CancelHoldRequest {
    #[serde(default)]
    pending_refund_cents: Option<i64>,
}

async fn create_hold(State(state): State<AppState>, Json(payload): Json<CreateHoldInput>) -> AppResult<Json<Value>> {
    validate_input(&payload)?;
    match holds::create_hold(&state.db_pool, payload).await? {
        CreateHoldOutcome::Created(hold) => Ok(Json(json!({
            "hold_id": hold.id, "status": hold.status, "expires_at": hold.expires_at, "replayed": false,
        }))),
        CreateHoldOutcome::Replayed(hold) => Ok(Json(json!({
            "hold_id": hold.id, "status": hold.status, "expires_at": hold.expires_at, "replayed": true,
        }))),
        CreateHoldOutcome::NoInventory => Err(AppError::Conflict("no_inventory".into())),
    }
}

async fn cancel_hold(
    State(state): State<AppState>,
    Path(path): Path<HoldPath>,
    Query(scope): Query<PropertyIdOnly>,
    Json(payload): Json<CancelHoldRequest>,
) -> AppResult<Json<Value>> {
    let owner: Option<String> = sqlx::query_scalar("SELECT property_id FROM holds WHERE id = $1")
        .bind(&path.hold_id)
        .fetch_optional(&state.db_pool)
        .await
        .map_err(AppError::from_sqlx)?;
    if owner.as_deref() != Some(scope.property_id.as_str()) {
        return Err(AppError::NotFound("hold not found".into()));
    }

    let outcome = holds::cancel_hold(&state.db_pool, &path.hold_id, payload.pending_refund_cents).await?;
    Ok(Json(json!({ "ok": true, "already_terminal": matches!(outcome, CancelHoldOutcome::NoOp) })))
}

#[derive(Debug, Deserialize)]
struct PropertyIdOnly {
    property_id: String,
}
