//! Dashboard `/child-policies` surface (section 6): the per-property age
//! buckets `domain::quote::compute_quote` maps a child's age onto to pick
//! a `price_bucketN_chd_cents` column. Buckets must not overlap -- enforced
//! by a DB exclusion constraint, so a conflicting insert surfaces as 409.

use axum::extract::{Path, Query, State};
use axum::middleware::from_fn_with_state;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::error::{AppError, AppResult};
use crate::middleware::authz_mw::{require_manager, require_viewer};
use crate::repository::table_service::{create_row, delete_row, list_rows};
use crate::schemas::{serialize_to_map, validate_input, ChildAgeBucketRequest};
use crate::state::AppState;

pub fn router(state: &AppState) -> Router<AppState> {
    let reads = Router::new()
        .route("/child-policies", get(list_buckets))
        .route_layer(from_fn_with_state(state.clone(), require_viewer));

    let writes = Router::new()
        .route("/child-policies", post(create_bucket))
        .route("/child-policies/{bucket_id}", delete(remove_bucket))
        .route_layer(from_fn_with_state(state.clone(), require_manager));

    Router::new().merge(reads).merge(writes)
}

#[derive(Debug, Deserialize)]
struct PropertyIdOnly {
    property_id: String,
}

#[derive(Debug, Deserialize)]
struct BucketPath {
    bucket_id: String,
}

async fn list_buckets(State(state): State<AppState>, Query(query): Query<PropertyIdOnly>) -> AppResult<Json<Value>> {
    let mut filters = Map::new();
    filters.insert("property_id".to_string(), Value::String(query.property_id));
    let rows = list_rows(&state.db_pool, "child_age_buckets", Some(&filters), 10, 0, "min_age", true).await?;
    Ok(Json(Value::Array(rows)))
}

async fn create_bucket(
    State(state): State<AppState>,
    Query(query): Query<PropertyIdOnly>,
    Json(payload): Json<ChildAgeBucketRequest>,
) -> AppResult<Json<Value>> {
    validate_input(&payload)?;
    if payload.min_age > payload.max_age {
        return Err(AppError::BadRequest("min_age must not exceed max_age".into()));
    }
    let mut fields = serialize_to_map(&payload);
    fields.insert("property_id".to_string(), json!(query.property_id));
    let row = create_row(&state.db_pool, "child_age_buckets", &fields).await?;
    Ok(Json(row))
}

async fn remove_bucket(
    State(state): State<AppState>,
    Path(path): Path<BucketPath>,
    Query(query): Query<PropertyIdOnly>,
) -> AppResult<Json<Value>> {
    let existing = crate::repository::table_service::get_row(&state.db_pool, "child_age_buckets", &path.bucket_id, "id").await?;
    let belongs = existing
        .as_object()
        .and_then(|obj| obj.get("property_id"))
        .and_then(Value::as_str)
        .map(|value| value == query.property_id)
        .unwrap_or(false);
    if !belongs {
        return Err(AppError::NotFound("child age bucket not found".into()));
    }
    let deleted = delete_row(&state.db_pool, "child_age_buckets", &path.bucket_id, "id").await?;
    Ok(Json(deleted))
}
