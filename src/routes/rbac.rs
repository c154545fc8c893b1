//! Dashboard `/rbac/users` surface (section 4.11): assigning, changing, and
//! revoking a user's role on a property. Role checks for every other
//! dashboard route are resolved by `authz::require_role`; this module is
//! the only place that writes `user_property_roles`.

use axum::extract::{Path, Query, State};
use axum::middleware::from_fn_with_state;
use axum::routing::{delete, get, patch, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::Row;

use crate::authz;
use crate::error::{AppError, AppResult};
use crate::middleware::authz_mw::{require_owner, require_viewer};
use crate::schemas::{validate_input, RbacAssignRequest};
use crate::state::AppState;

pub fn router(state: &AppState) -> Router<AppState> {
    let reads = Router::new()
        .route("/rbac/users", get(list_roles))
        .route_layer(from_fn_with_state(state.clone(), require_viewer));

    let writes = Router::new()
        .route("/rbac/users", post(assign_role))
        .route("/rbac/users/{user_id}", patch(update_role))
        .route("/rbac/users/{user_id}", delete(remove_role))
        .route_layer(from_fn_with_state(state.clone(), require_owner));

    Router::new().merge(reads).merge(writes)
}

#[derive(Debug, Deserialize)]
struct PropertyIdOnly {
    property_id: String,
}

#[derive(Debug, Deserialize)]
struct UserPath {
    user_id: String,
}

#[derive(Debug, Deserialize)]
struct UpdateRoleRequest {
    role: String,
}

async fn list_roles(State(state): State<AppState>, Query(query): Query<PropertyIdOnly>) -> AppResult<Json<Value>> {
    let rows = sqlx::query(
        "SELECT row_to_json(t) AS row FROM (
            SELECT u.id::text AS user_id, u.email, upr.role
            FROM user_property_roles upr
            JOIN users u ON u.id = upr.user_id
            WHERE upr.property_id = $1
            ORDER BY u.email
         ) t",
    )
    .bind(&query.property_id)
    .fetch_all(&state.db_pool)
    .await
    .map_err(AppError::from_sqlx)?;

    let data: Vec<Value> = rows
        .into_iter()
        .filter_map(|row| row.try_get::<Option<Value>, _>("row").ok().flatten())
        .collect();
    Ok(Json(json!({ "data": data })))
}

/// Looks the invited user up by email, creating a placeholder row (no
/// `oidc_subject` yet) if they have never signed in, then grants the role.
async fn assign_role(
    State(state): State<AppState>,
    Query(query): Query<PropertyIdOnly>,
    Json(payload): Json<RbacAssignRequest>,
) -> AppResult<Json<Value>> {
    validate_input(&payload)?;

    let user_id: String = sqlx::query_scalar(
        "INSERT INTO users (email) VALUES ($1)
         ON CONFLICT (email) DO UPDATE SET email = EXCLUDED.email
         RETURNING id::text",
    )
    .bind(&payload.user_email)
    .fetch_one(&state.db_pool)
    .await
    .map_err(AppError::from_sqlx)?;

    sqlx::query(
        "INSERT INTO user_property_roles (property_id, user_id, role)
         VALUES ($1, $2, $3)
         ON CONFLICT (property_id, user_id) DO UPDATE SET role = EXCLUDED.role",
    )
    .bind(&query.property_id)
    .bind(&user_id)
    .bind(&payload.role)
    .execute(&state.db_pool)
    .await
    .map_err(AppError::from_sqlx)?;

    Ok(Json(json!({ "user_id": user_id, "role": payload.role })))
}

async fn update_role(
    State(state): State<AppState>,
    Path(path): Path<UserPath>,
    Query(query): Query<PropertyIdOnly>,
    Json(payload): Json<UpdateRoleRequest>,
) -> AppResult<Json<Value>> {
    if authz::Role::parse(&payload.role).is_none() {
        return Err(AppError::BadRequest(format!("unknown role {}", payload.role)));
    }

    let updated = sqlx::query(
        "UPDATE user_property_roles SET role = $1 WHERE property_id = $2 AND user_id = $3",
    )
    .bind(&payload.role)
    .bind(&query.property_id)
    .bind(&path.user_id)
    .execute(&state.db_pool)
    .await
    .map_err(AppError::from_sqlx)?;

    if updated.rows_affected() == 0 {
        return Err(AppError::NotFound("no role assignment for this user on this property".into()));
    }
    Ok(Json(json!({ "ok": true, "role": payload.role })))
}

async fn remove_role(
    State(state): State<AppState>,
    Path(path): Path<UserPath>,
    Query(query): Query<PropertyIdOnly>,
) -> AppResult<Json<Value>> {
    authz::assert_removal_keeps_an_owner(&state.db_pool, &query.property_id, &path.user_id).await?;

    sqlx::query("DELETE FROM user_property_roles WHERE property_id = $1 AND user_id = $2")
        .bind(&query.property_id)
        .bind(&path.user_id)
        .execute(&state.db_pool)
        .await
        .map_err(AppError::from_sqlx)?;

    Ok(Json(json!({ "ok": true })))
}
