//! `GET /me` (section 6): resolves the caller's bearer token to a local
//! identity and the roles they hold across every property, for the
//! dashboard's property switcher. Not property-scoped, so it cannot go
//! through the `require_*` middleware -- it verifies the token itself.

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use sqlx::Row;

use crate::authz;
use crate::error::{AppError, AppResult};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/me", get(me))
}

async fn me(State(state): State<AppState>, request: Request) -> AppResult<Json<Value>> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("missing bearer token".to_string()))?;
    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::Unauthorized("malformed authorization header".to_string()))?;

    let subject = authz::verify_bearer_token(&state, token).await?;
    let user_id = authz::resolve_user_id(&state.db_pool, &subject).await?;

    let row = sqlx::query("SELECT email FROM users WHERE id = $1")
        .bind(&user_id)
        .fetch_one(&state.db_pool)
        .await
        .map_err(AppError::from_sqlx)?;
    let email: String = row.get("email");

    let role_rows = sqlx::query("SELECT property_id, role FROM user_property_roles WHERE user_id = $1")
        .bind(&user_id)
        .fetch_all(&state.db_pool)
        .await
        .map_err(AppError::from_sqlx)?;

    let roles: Vec<Value> = role_rows
        .into_iter()
        .map(|row| {
            json!({
                "property_id": row.get::<String, _>("property_id"),
                "role": row.get::<String, _>("role"),
            })
        })
        .collect();

    Ok(Json(json!({ "user_id": user_id, "email": email, "roles": roles })))
}
