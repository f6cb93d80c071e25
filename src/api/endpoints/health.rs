use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::api::types::ApiContext;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub active_jobs: usize,
}

/// `GET /api/health`
pub async fn check(State(ctx): State<ApiContext>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: if ctx.dispatcher.is_shutting_down() { "shutting_down" } else { "ok" },
        version: crate::config::APP_VERSION,
        active_jobs: ctx.dispatcher.active_jobs(),
    })
}
