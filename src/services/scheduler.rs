use std::time::Duration;

use chrono::{Datelike, Timelike, Utc};
use tokio::time::sleep;

use crate::retention;
use crate::state::AppState;

/// Background scheduler for the worker process (section 4.12): runs the
/// retention sweep once per calendar day. A single job today, but kept as
/// a loop-plus-spawn shape so a second daily job can be added the same way
/// without restructuring.
pub async fn run_background_scheduler(state: AppState) {
    tracing::info!("background scheduler started");

    let mut last_daily_run: Option<u32> = None;

    loop {
        sleep(Duration::from_secs(60)).await;

        let now_utc = Utc::now();
        let today = now_utc.date_naive();
        let today_ordinal = today.ordinal();

        if last_daily_run == Some(today_ordinal) {
            continue;
        }
        // Run daily jobs at or after 03:00 UTC, off guest-traffic peak hours.
        if now_utc.hour() < 3 {
            continue;
        }
        last_daily_run = Some(today_ordinal);

        let pool = state.db_pool.clone();
        let config = state.config.clone();
        tokio::spawn(async move {
            if let Err(error) = retention::run_once(&pool, &config).await {
                tracing::error!(%error, "retention_sweep_failed");
            }
        });
    }
}
