use axum::http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use tower_http::cors::{Any, CorsLayer};

use crate::config::AppConfig;

/// CORS only gates the dashboard surface (webhooks are server-to-server and
/// carry their own signature headers, not browser credentials).
pub fn build_cors_layer(config: &AppConfig) -> CorsLayer {
    let headers = vec![
        ACCEPT,
        AUTHORIZATION,
        CONTENT_TYPE,
        axum::http::header::HeaderName::from_static("x-property-id"),
    ];

    let mut layer = CorsLayer::new()
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PUT,
            axum::http::Method::PATCH,
            axum::http::Method::DELETE,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers(headers);

    if config.cors_origins.iter().any(|origin| origin.trim() == "*") {
        layer = layer.allow_origin(Any).allow_credentials(false);
    } else {
        let origins = config
            .cors_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect::<Vec<_>>();
        layer = layer.allow_origin(origins).allow_credentials(true);
    }

    layer
}
