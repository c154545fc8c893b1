use std::time::Duration;

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};

use crate::state::AppState;

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let db_ok = match tokio::time::timeout(
        Duration::from_secs(3),
        sqlx::query("SELECT 1").fetch_one(&state.db_pool),
    )
    .await
    {
        Ok(Ok(_)) => true,
        Ok(Err(error)) => {
            tracing::error!(error = %error, "health_check_db_query_failed");
            false
        }
        Err(_) => {
            tracing::error!("health_check_db_query_timed_out");
            false
        }
    };

    let status = if db_ok { "ok" } else { "degraded" };
    Json(json!({
        "status": status,
        "now": Utc::now().to_rfc3339(),
        "db": db_ok,
    }))
}
