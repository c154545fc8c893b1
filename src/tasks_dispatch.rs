//! Task dispatch (section 4.8): deterministic task names, OIDC minting on
//! the ingress side and audience-exact verification on the worker side,
//! and the retry-classification contract every task handler returns
//! through. `TaskResponse` (error.rs) already encodes the three outcomes;
//! this module is about getting the request to the worker safely.

use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

use crate::error::AppError;
use crate::state::AppState;

/// `expire-hold:{hold_id}`, `stripe:{event_id}`, etc. Stable across retries
/// so the queue's own dedup treats a re-enqueue as a no-op.
pub fn task_name(kind: &str, key: &str) -> String {
    format!("{kind}:{key}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Created,
    AlreadyExists,
}

/// Mints an identity token scoped to `audience` by calling the configured
/// token-minting endpoint. The OIDC issuer itself is an external
/// collaborator; this just shapes the request/response contract.
pub async fn mint_identity_token(
    http_client: &Client,
    token_mint_url: &str,
    audience: &str,
) -> Result<String, AppError> {
    let response = http_client
        .post(token_mint_url)
        .json(&json!({ "audience": audience }))
        .send()
        .await
        .map_err(|error| AppError::Dependency(format!("token mint request failed: {error}")))?;

    if !response.status().is_success() {
        return Err(AppError::Dependency(format!(
            "token mint returned {}",
            response.status()
        )));
    }

    let body: Value = response
        .json()
        .await
        .map_err(|error| AppError::Dependency(format!("token mint response unparsable: {error}")))?;
    body.get("token")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| AppError::Dependency("token mint response missing token".to_string()))
}

/// Enqueues a task by name to the managed queue, attaching a freshly minted
/// OIDC identity token as the `Authorization` bearer the worker will
/// verify. A "name already exists" response (409) is success: the task is
/// already scheduled.
pub async fn enqueue_task(
    state: &AppState,
    name: &str,
    worker_path: &str,
    body: Value,
) -> Result<EnqueueOutcome, AppError> {
    let queue_url = state
        .config
        .task_queue_base_url
        .as_deref()
        .ok_or_else(|| AppError::Dependency("TASK_QUEUE_BASE_URL not configured".to_string()))?;
    let mint_url = state
        .config
        .task_token_mint_url
        .as_deref()
        .ok_or_else(|| AppError::Dependency("TASK_TOKEN_MINT_URL not configured".to_string()))?;

    let token = mint_identity_token(&state.http_client, mint_url, &state.config.task_oidc_audience).await?;

    let mut request = state
        .http_client
        .post(format!("{queue_url}/tasks"))
        .bearer_auth(&token)
        .json(&json!({
            "name": name,
            "url": format!("{}{}", state.config.task_oidc_audience, worker_path),
            "body": body,
        }));
    if let Some(api_key) = state.config.task_queue_api_key.as_deref() {
        request = request.header("x-queue-api-key", api_key);
    }

    let response = request
        .send()
        .await
        .map_err(|error| AppError::Transient(format!("task enqueue request failed: {error}")))?;

    match response.status() {
        StatusCode::CREATED | StatusCode::OK => Ok(EnqueueOutcome::Created),
        StatusCode::CONFLICT => Ok(EnqueueOutcome::AlreadyExists),
        status if status.is_server_error() => {
            Err(AppError::Transient(format!("task enqueue returned {status}")))
        }
        status => Err(AppError::permanent(
            "task_enqueue_rejected",
            format!("task enqueue returned {status}"),
        )),
    }
}

/// Verifies the worker received a task dispatch bearer token whose
/// audience exactly matches this service's own canonical URL. A mismatch
/// is never tolerated with a prefix/suffix match -- the spec calls a
/// mismatch a hard operational incident, so this stays strict.
pub async fn verify_task_token(state: &AppState, token: &str) -> Result<(), AppError> {
    let audience = crate::authz::verify_task_bearer(state, token).await?;
    if audience != state.config.task_oidc_audience {
        tracing::error!(
            expected = %state.config.task_oidc_audience,
            actual = %audience,
            "task_token_audience_mismatch"
        );
        return Err(AppError::Unauthorized("task token audience mismatch".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_name_is_deterministic() {
        assert_eq!(task_name("expire-hold", "hold_123"), "expire-hold:hold_123");
        assert_eq!(task_name("stripe", "evt_1"), "stripe:evt_1");
    }
}
