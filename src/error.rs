use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Stable error taxonomy shared by both the ingress and worker roles.
///
/// Each variant carries the HTTP contract described in the error-handling
/// design: validation/authz/conflict errors surface immediately with a code,
/// `Transient` maps to a 500 so the task queue retries, `Permanent` maps to a
/// terminal 200 so it does not, and `InvariantViolation` is a SEV0 signal
/// that something the database should have prevented slipped through.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    UnprocessableEntity(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("dependency failure: {0}")]
    Dependency(String),
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("permanent failure: {code}: {message}")]
    Permanent { code: String, message: String },
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "bad_request",
            AppError::UnprocessableEntity(_) => "unprocessable_entity",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::Forbidden(_) => "forbidden",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::Dependency(_) => "dependency_unavailable",
            AppError::Transient(_) => "transient_failure",
            AppError::Permanent { .. } => "permanent_failure",
            AppError::InvariantViolation(_) => "invariant_violation",
            AppError::Internal(_) => "internal_error",
        }
    }

    pub fn permanent(code: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Permanent {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Maps a sqlx error onto the taxonomy: serialization failures and
    /// connection problems are transient (worth retrying), everything else
    /// is treated as an internal/dependency failure. Unique-violations are
    /// NOT mapped here — callers that rely on a unique constraint as their
    /// final idempotency guard must inspect `sqlx::Error::as_database_error`
    /// themselves and turn the conflict into a replay-success response.
    pub fn from_sqlx(error: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = error {
            if let Some(code) = db_err.code() {
                // 40001 = serialization_failure, 40P01 = deadlock_detected
                if code == "40001" || code == "40P01" {
                    return AppError::Transient(format!("db contention: {db_err}"));
                }
                // 23P01 = exclusion_violation — this must never happen if the
                // application-layer guard ran first.
                if code == "23P01" {
                    return AppError::InvariantViolation(format!(
                        "exclusion constraint violated: {db_err}"
                    ));
                }
            }
        }
        match error {
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
                AppError::Transient(format!("database unavailable: {error}"))
            }
            other => AppError::Internal(format!("database error: {other}")),
        }
    }

    /// `true` if this is a unique-violation on the named constraint, the
    /// "final line of defense" idempotency guard from the substrate design.
    pub fn is_unique_violation(error: &sqlx::Error, constraint: &str) -> bool {
        matches!(
            error.as_database_error().and_then(|e| e.constraint()),
            Some(name) if name == constraint
        )
    }
}

/// Payload shape for a worker task endpoint's response, per the retry
/// contract: transient failures return 500 so the queue retries, permanent
/// and already-done outcomes return 200 so it doesn't.
pub struct TaskResponse;

impl TaskResponse {
    pub fn transient(message: impl Into<String>) -> Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "transient_failure", "message": message.into() })),
        )
            .into_response()
    }

    pub fn terminal(code: impl Into<String>) -> Response {
        (
            StatusCode::OK,
            Json(json!({ "ok": false, "terminal": true, "error": code.into() })),
        )
            .into_response()
    }

    pub fn already_done() -> Response {
        (StatusCode::OK, Json(json!({ "ok": true, "already_sent": true }))).into_response()
    }

    pub fn done(extra: serde_json::Value) -> Response {
        let mut body = json!({ "ok": true });
        if let (Some(obj), Some(extra_obj)) = (body.as_object_mut(), extra.as_object()) {
            for (k, v) in extra_obj {
                obj.insert(k.clone(), v.clone());
            }
        }
        (StatusCode::OK, Json(body)).into_response()
    }
}

/// Converts an `AppError` that surfaced inside a worker task handler into
/// the 500/200 retry contract of section 4.8. Use this at task route
/// boundaries instead of the default `IntoResponse` impl, which is for
/// staff-facing dashboard endpoints.
pub fn task_response_for(error: &AppError) -> Response {
    match error {
        AppError::Transient(_) | AppError::Dependency(_) | AppError::Internal(_) => {
            TaskResponse::transient(error.to_string())
        }
        AppError::Permanent { code, .. } => TaskResponse::terminal(code.clone()),
        AppError::InvariantViolation(_) => {
            tracing::error!(sev0 = true, error = %error, "invariant violation surfaced to a task handler");
            TaskResponse::transient(error.to_string())
        }
        other => TaskResponse::terminal(other.code()),
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if matches!(self, AppError::InvariantViolation(_)) {
            tracing::error!(sev0 = true, error = %self, "invariant violation");
        }
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::UnprocessableEntity(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Dependency(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Transient(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Permanent { .. } => StatusCode::BAD_REQUEST,
            AppError::InvariantViolation(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(json!({
            "code": self.code(),
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
