//! HTTP routes:
//!
//! - `POST /api/reports/upload` multipart report upload
//! - `GET  /api/health`
//! - `GET  /ws?userId=<id>` WebSocket subscription to a user's report events

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::api::endpoints;
use crate::api::types::{ApiContext, HttpSettings};
use crate::api::websocket;

pub fn report_api_router(ctx: ApiContext, settings: &HttpSettings) -> Router {
    Router::new()
        .route("/api/reports/upload", post(endpoints::reports::upload))
        .route("/api/health", get(endpoints::health::check))
        .route("/ws", get(websocket::ws_upgrade))
        .with_state(ctx)
        .layer(DefaultBodyLimit::max(settings.max_upload_bytes))
        .layer(cors_layer(&settings.allowed_origins))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
}
