use axum::routing::get;
use axum::Router;

use crate::state::AppState;

pub mod cancellation_policy;
pub mod child_policies;
pub mod guests;
pub mod health;
pub mod holds;
pub mod me;
pub mod occupancy;
pub mod outbox;
pub mod payments;
pub mod pending_refunds;
pub mod rates;
pub mod rbac;
pub mod reservations;
pub mod room_types;
pub mod rooms;
pub mod tasks;
pub mod webhooks;

/// Mounts the dashboard/API surface under `state.config.api_prefix` plus the
/// public webhook intake -- the ingress role's whole HTTP surface (section
/// 6). Role-gating is applied per sub-router at construction time (see each
/// module's own `router(state)`), not here.
pub fn ingress_router(state: &AppState) -> Router<AppState> {
    let api = Router::new()
        .route("/health", get(health::health))
        .merge(me::router())
        .merge(reservations::router(state))
        .merge(holds::router(state))
        .merge(rates::router(state))
        .merge(child_policies::router(state))
        .merge(cancellation_policy::router(state))
        .merge(occupancy::router(state))
        .merge(rooms::router(state))
        .merge(room_types::router(state))
        .merge(guests::router(state))
        .merge(outbox::router(state))
        .merge(payments::router(state))
        .merge(pending_refunds::router(state))
        .merge(rbac::router(state));

    Router::new()
        .nest(&state.config.api_prefix, api)
        .merge(webhooks::router())
}

/// The worker role's whole HTTP surface: only the OIDC-protected task
/// endpoints the managed queue calls back into (section 4.8). Never mounted
/// behind CORS or the dashboard's trusted-host allowlist.
pub fn worker_router() -> Router<AppState> {
    Router::new().route("/health", get(health::health)).merge(tasks::router())
}
