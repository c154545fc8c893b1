//! Ingress binary: the guest-facing WhatsApp webhook intake and the
//! staff-facing dashboard API (section 6). Never exposes `/tasks/*` --
//! that surface belongs to the worker binary alone.

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::{middleware::from_fn_with_state, Router};
use hotelly_core::config::AppConfig;
use hotelly_core::middleware::cors::build_cors_layer;
use hotelly_core::middleware::request_id::inject_request_id;
use hotelly_core::middleware::security::enforce_trusted_hosts;
use hotelly_core::routes;
use hotelly_core::services;
use hotelly_core::state::AppState;
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::GovernorLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = AppConfig::from_env();
    let state = AppState::build(config).await?;

    if state.config.is_production() && state.config.vault_key_hex.is_none() {
        tracing::warn!("VAULT_KEY_HEX is not set in production -- falling back to the dev key");
    }

    let mut app = Router::new()
        .merge(routes::ingress_router(&state))
        .layer(DefaultBodyLimit::max(2 * 1024 * 1024))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::GATEWAY_TIMEOUT,
            Duration::from_secs(30),
        ))
        .layer(axum::middleware::from_fn(inject_request_id))
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer(&state.config))
        .layer(from_fn_with_state(state.clone(), enforce_trusted_hosts))
        .with_state(state.clone());

    if state.config.rate_limit_enabled_runtime() {
        let governor_config = GovernorConfigBuilder::default()
            .per_second(state.config.rate_limit_per_second)
            .burst_size(state.config.rate_limit_burst_size)
            .finish()
            .expect("valid governor config");
        app = app.layer(GovernorLayer::new(governor_config));
    } else {
        tracing::warn!("Rate limiting middleware disabled");
    }

    let socket_addr: SocketAddr = format!("{}:{}", state.config.host, state.config.port).parse()?;
    let listener = tokio::net::TcpListener::bind(socket_addr).await?;

    if state.config.scheduler_enabled {
        let sched_state = state.clone();
        tokio::spawn(services::scheduler::run_background_scheduler(sched_state));
        tracing::info!("Background retention scheduler enabled");
    }

    tracing::info!(
        app_name = %state.config.app_name,
        environment = %state.config.environment,
        api_prefix = %state.config.api_prefix,
        "ingress listening"
    );

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {},
            _ = sigterm.recv() => {},
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
    tracing::info!("Shutdown signal received, finishing in-flight requests");
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tower_http=info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}
