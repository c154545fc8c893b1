//! Dashboard `/payments` listing (section 6). Read-only: payments are
//! written only by the convert-hold transaction (`domain::holds`) and
//! reconciled against Stripe by the worker, never mutated from here.

use axum::extract::{Query, State};
use axum::middleware::from_fn_with_state;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value;
use sqlx::Row;

use crate::error::AppError;
use crate::middleware::authz_mw::require_viewer;
use crate::state::AppState;

pub fn router(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/payments", get(list_payments))
        .route_layer(from_fn_with_state(state.clone(), require_viewer))
}

#[derive(Debug, Deserialize)]
struct ListPaymentsQuery {
    property_id: String,
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_limit() -> i64 {
    50
}

async fn list_payments(
    State(state): State<AppState>,
    Query(query): Query<ListPaymentsQuery>,
) -> Result<Json<Vec<Value>>, AppError> {
    let limit = query.limit.clamp(1, 200);
    let rows = sqlx::query(
        "SELECT id, property_id, provider, provider_object_id, status, amount_cents, currency,
                reservation_id, created_at, updated_at
         FROM payments
         WHERE property_id = $1
         ORDER BY created_at DESC
         LIMIT $2",
    )
    .bind(&query.property_id)
    .bind(limit)
    .fetch_all(&state.db_pool)
    .await
    .map_err(AppError::from_sqlx)?;

    let payments = rows
        .into_iter()
        .map(|row| {
            serde_json::json!({
                "id": row.get::<String, _>("id"),
                "property_id": row.get::<String, _>("property_id"),
                "provider": row.get::<String, _>("provider"),
                "provider_object_id": row.get::<String, _>("provider_object_id"),
                "status": row.get::<String, _>("status"),
                "amount_cents": row.get::<i64, _>("amount_cents"),
                "currency": row.get::<String, _>("currency"),
                "reservation_id": row.get::<Option<String>, _>("reservation_id"),
                "created_at": row.get::<chrono::DateTime<chrono::Utc>, _>("created_at").to_rfc3339(),
                "updated_at": row.get::<chrono::DateTime<chrono::Utc>, _>("updated_at").to_rfc3339(),
            })
        })
        .collect();

    Ok(Json(payments))
}
