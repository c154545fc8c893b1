//! Dashboard `/cancellation-policy` surface (section 6): one policy row per
//! property. `PUT` upserts rather than create-then-patch since there is
//! exactly one row to manage and no id for callers to track.

use axum::extract::{Query, State};
use axum::middleware::from_fn_with_state;
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value;
use sqlx::Row;

use crate::error::{AppError, AppResult};
use crate::middleware::authz_mw::{require_manager, require_viewer};
use crate::schemas::{validate_input, CancellationPolicyRequest};
use crate::state::AppState;

pub fn router(state: &AppState) -> Router<AppState> {
    let reads = Router::new()
        .route("/cancellation-policy", get(get_policy))
        .route_layer(from_fn_with_state(state.clone(), require_viewer));

    let writes = Router::new()
        .route("/cancellation-policy", put(upsert_policy))
        .route_layer(from_fn_with_state(state.clone(), require_manager));

    Router::new().merge(reads).merge(writes)
}

#[derive(Debug, Deserialize)]
struct PropertyIdOnly {
    property_id: String,
}

async fn get_policy(State(state): State<AppState>, Query(query): Query<PropertyIdOnly>) -> AppResult<Json<Value>> {
    let row = sqlx::query(
        "SELECT row_to_json(t) AS row FROM (
            SELECT property_id, policy_type, penalty_percent, free_until_days_before_checkin
            FROM cancellation_policies WHERE property_id = $1
         ) t",
    )
    .bind(&query.property_id)
    .fetch_optional(&state.db_pool)
    .await
    .map_err(AppError::from_sqlx)?;

    let policy = row
        .and_then(|row| row.try_get::<Option<Value>, _>("row").ok().flatten())
        .ok_or_else(|| AppError::NotFound("cancellation policy not set for this property".into()))?;
    Ok(Json(policy))
}

async fn upsert_policy(
    State(state): State<AppState>,
    Query(query): Query<PropertyIdOnly>,
    Json(payload): Json<CancellationPolicyRequest>,
) -> AppResult<Json<Value>> {
    validate_input(&payload)?;
    let row = sqlx::query(
        "INSERT INTO cancellation_policies (property_id, policy_type, penalty_percent, free_until_days_before_checkin)
         VALUES ($1, $2, $3, $4)
         ON CONFLICT (property_id) DO UPDATE SET
             policy_type = EXCLUDED.policy_type,
             penalty_percent = EXCLUDED.penalty_percent,
             free_until_days_before_checkin = EXCLUDED.free_until_days_before_checkin
         RETURNING row_to_json(cancellation_policies.*) AS row",
    )
    .bind(&query.property_id)
    .bind(&payload.policy_type)
    .bind(payload.penalty_percent)
    .bind(payload.free_until_days_before_checkin)
    .fetch_one(&state.db_pool)
    .await
    .map_err(AppError::from_sqlx)?;

    let policy: Value = row.try_get("row").map_err(AppError::from_sqlx)?;
    Ok(Json(policy))
}
