//! Role-gate middleware for the dashboard surface (section 4.11). Each
//! protected route is wrapped with one of the `require_*` functions below,
//! which extracts the bearer token, resolves it to a local user, loads
//! that user's role on the `property_id` carried in the query string, and
//! rejects with 401 (no/invalid token) or 403 (authenticated but
//! insufficient role).

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::authz::{self, Role};
use crate::error::AppError;
use crate::state::AppState;

pub async fn require_viewer(state: State<AppState>, request: Request, next: Next) -> Response {
    guard(state, request, next, Role::Viewer).await
}

pub async fn require_governance(state: State<AppState>, request: Request, next: Next) -> Response {
    guard(state, request, next, Role::Governance).await
}

pub async fn require_staff(state: State<AppState>, request: Request, next: Next) -> Response {
    guard(state, request, next, Role::Staff).await
}

pub async fn require_manager(state: State<AppState>, request: Request, next: Next) -> Response {
    guard(state, request, next, Role::Manager).await
}

pub async fn require_owner(state: State<AppState>, request: Request, next: Next) -> Response {
    guard(state, request, next, Role::Owner).await
}

async fn guard(State(state): State<AppState>, mut request: Request, next: Next, minimum: Role) -> Response {
    match guard_inner(&state, &request, minimum).await {
        Ok(role) => {
            // Threaded through so handlers whose required role depends on
            // the request body (e.g. confirming a reservation) can assert a
            // stricter minimum than the route layer's own gate.
            request.extensions_mut().insert(role);
            next.run(request).await
        }
        Err(error) => error.into_response(),
    }
}

async fn guard_inner(state: &AppState, request: &Request, minimum: Role) -> Result<Role, AppError> {
    let token = bearer_token(request)?;
    let subject = authz::verify_bearer_token(state, &token).await?;
    let user_id = authz::resolve_user_id(&state.db_pool, &subject).await?;
    let property_id = property_id_from_query(request)?;
    authz::require_role(&state.db_pool, &user_id, &property_id, minimum).await
}

fn bearer_token(request: &Request) -> Result<String, AppError> {
    let header = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("missing bearer token".to_string()))?;
    header
        .strip_prefix("Bearer ")
        .map(str::to_string)
        .ok_or_else(|| AppError::Unauthorized("malformed authorization header".to_string()))
}

/// Every property-scoped endpoint accepts `property_id` exclusively via
/// query string, never as a path segment or header, per section 4.11.
fn property_id_from_query(request: &Request) -> Result<String, AppError> {
    let query = request.uri().query().unwrap_or("");
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "property_id")
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AppError::BadRequest("property_id query parameter is required".to_string()))
}
