//! Trusted-host enforcement: rejects requests whose `Host` header doesn't
//! match the configured allow-list, guarding against DNS-rebinding-style
//! attacks on the dashboard surface. Disabled in effect when the allow-list
//! is empty (local dev with no `TRUSTED_HOSTS` set).

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;

use crate::state::AppState;

pub async fn enforce_trusted_hosts(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if state.config.trusted_hosts.is_empty() {
        return Ok(next.run(request).await);
    }

    let host = request
        .headers()
        .get(axum::http::header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.split(':').next().unwrap_or(value))
        .unwrap_or("");

    if state.config.trusted_hosts.iter().any(|trusted| trusted == host) {
        Ok(next.run(request).await)
    } else {
        tracing::warn!(host, "untrusted_host_rejected");
        Err(StatusCode::BAD_REQUEST)
    }
}
