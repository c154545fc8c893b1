//! Dashboard reservation surface (section 6): listing, manual creation, the
//! quote endpoint the booking flow shares with `POST /holds`, and the
//! status-transition and room-assignment actions. The state machine itself
//! lives in `domain::reservations`; this module only does request
//! plumbing, role gating, and property scoping.

use axum::extract::{Extension, Path, Query, State};
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::authz::Role;
use crate::domain::quote::{compute_quote, QuoteResult};
use crate::domain::reservations::{
    self, CreateManualReservationInput, ReservationStatus, TransitionContext, TransitionOutcome,
};
use crate::error::{AppError, AppResult};
use crate::middleware::authz_mw::{require_staff, require_viewer};
use crate::schemas::{validate_input, AssignRoomRequest, QuoteRequest, QuoteResponse, TransitionActionRequest};
use crate::state::AppState;

pub fn router(state: &AppState) -> Router<AppState> {
    let reads = Router::new()
        .route("/reservations/actions/quote", post(quote))
        .route("/reservations", get(list_reservations))
        .route("/reservations/{reservation_id}", get(get_reservation))
        .route_layer(from_fn_with_state(state.clone(), require_viewer));

    let writes = Router::new()
        .route("/reservations", post(create_reservation))
        .route(
            "/reservations/{reservation_id}/actions/transition",
            post(transition),
        )
        .route(
            "/reservations/{reservation_id}/actions/assign-room",
            post(assign_room),
        )
        .route_layer(from_fn_with_state(state.clone(), require_staff));

    Router::new().merge(reads).merge(writes)
}

#[derive(Debug, Deserialize)]
struct PropertyScopedQuery {
    property_id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_limit() -> i64 {
    100
}

#[derive(Debug, Deserialize)]
struct ReservationPath {
    reservation_id: String,
}

#[derive(Debug, Deserialize)]
struct PropertyIdOnly {
    property_id: String,
}

/// `reservations` carries the GiST exclusion constraint and multi-step
/// transition logic, so it is not one of `table_service`'s allow-listed
/// tables; reads here go straight to hand-written SQL instead.
async fn list_reservations(
    State(state): State<AppState>,
    Query(query): Query<PropertyScopedQuery>,
) -> AppResult<Json<Value>> {
    let rows = sqlx::query(
        "SELECT row_to_json(t) AS row FROM (
            SELECT id::text, property_id, room_type_id, room_id, checkin, checkout,
                   total_cents, currency, status, guest_id, guest_name, created_at
            FROM reservations
            WHERE property_id = $1
              AND ($2::text IS NULL OR status = $2)
            ORDER BY checkin DESC
            LIMIT $3
         ) t",
    )
    .bind(&query.property_id)
    .bind(query.status.as_deref())
    .bind(query.limit.clamp(1, 1000))
    .fetch_all(&state.db_pool)
    .await
    .map_err(AppError::from_sqlx)?;

    let data: Vec<Value> = rows
        .into_iter()
        .filter_map(|row| sqlx::Row::try_get::<Option<Value>, _>(&row, "row").ok().flatten())
        .collect();

    Ok(Json(json!({ "data": data })))
}

async fn get_reservation(
    State(state): State<AppState>,
    Path(path): Path<ReservationPath>,
    Query(query): Query<PropertyIdOnly>,
) -> AppResult<Json<Value>> {
    let row = sqlx::query(
        "SELECT row_to_json(t) AS row FROM (
            SELECT id::text, property_id, room_type_id, room_id, checkin, checkout,
                   total_cents, currency, status, guest_id, guest_name, created_at
            FROM reservations WHERE id = $1 AND property_id = $2
         ) t",
    )
    .bind(&path.reservation_id)
    .bind(&query.property_id)
    .fetch_optional(&state.db_pool)
    .await
    .map_err(AppError::from_sqlx)?;

    let reservation = row
        .and_then(|row| sqlx::Row::try_get::<Option<Value>, _>(&row, "row").ok().flatten())
        .ok_or_else(|| AppError::NotFound("reservation not found".into()))?;
    Ok(Json(reservation))
}

async fn create_reservation(
    State(state): State<AppState>,
    Json(payload): Json<CreateManualReservationInput>,
) -> AppResult<Json<Value>> {
    validate_input(&payload)?;
    match reservations::create_manual_reservation(&state.db_pool, payload).await? {
        Ok(reservation_id) => Ok(Json(json!({ "reservation_id": reservation_id }))),
        Err(()) => Err(AppError::Conflict("no_inventory".into())),
    }
}

async fn quote(
    State(state): State<AppState>,
    Json(payload): Json<QuoteRequest>,
) -> AppResult<Json<Value>> {
    validate_input(&payload)?;
    let result = compute_quote(
        &state.db_pool,
        &payload.property_id,
        &payload.room_type_id,
        payload.checkin,
        payload.checkout,
        payload.adult_count,
        &payload.children_ages,
        &payload.currency,
    )
    .await?;

    match result {
        QuoteResult::Ok { total_cents, currency } => Ok(Json(json!(QuoteResponse { total_cents, currency }))),
        QuoteResult::Unavailable { reason, meta } => Ok(Json(json!({
            "available": false,
            "reason": reason.code(),
            "meta": meta,
        }))),
    }
}

async fn transition(
    State(state): State<AppState>,
    Extension(role): Extension<Role>,
    Path(path): Path<ReservationPath>,
    Query(query): Query<PropertyIdOnly>,
    Json(payload): Json<TransitionActionRequest>,
) -> AppResult<Json<Value>> {
    validate_input(&payload)?;
    let to = ReservationStatus::parse(&payload.to_status)
        .ok_or_else(|| AppError::BadRequest(format!("unknown status {}", payload.to_status)))?;

    if to == ReservationStatus::Confirmed {
        if payload.guarantee_justification.is_none() {
            return Err(AppError::UnprocessableEntity(
                "guarantee_justification is required to confirm a reservation".into(),
            ));
        }
        if role < Role::Manager {
            return Err(AppError::Forbidden(
                "confirming a reservation requires the manager role".into(),
            ));
        }
    }

    let outcome = reservations::transition_status(
        &state.db_pool,
        TransitionContext {
            property_id: &query.property_id,
            reservation_id: &path.reservation_id,
            to,
            changed_by: "staff",
            notes: payload.notes.as_deref().unwrap_or(""),
            guarantee_justification: payload.guarantee_justification.as_deref(),
        },
    )
    .await?;

    Ok(Json(json!({
        "ok": true,
        "already_in_target_state": matches!(outcome, TransitionOutcome::AlreadyInTargetState),
        "status": to.as_str(),
    })))
}

async fn assign_room(
    State(state): State<AppState>,
    Path(path): Path<ReservationPath>,
    Query(query): Query<PropertyIdOnly>,
    Json(payload): Json<AssignRoomRequest>,
) -> AppResult<Json<Value>> {
    validate_input(&payload)?;

    reservations::assign_room(&state.db_pool, &query.property_id, &path.reservation_id, &payload.room_id).await?;

    Ok(Json(json!({ "ok": true, "room_id": payload.room_id })))
}
