use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use std::collections::HashMap;

use crate::core::metrics;
use crate::core::state::AppState;
use crate::repositories::StoreHealth;
use crate::schemas::{HealthResponse, ReadinessResponse, RootResponse};

const SERVICE_NAME: &str = "exam-grader";

pub(crate) async fn root(State(state): State<AppState>) -> Json<RootResponse> {
    let api = state.settings().api();
    let response = RootResponse {
        message: api.project_name.clone(),
        version: api.version.clone(),
        api_prefix: api.prefix.clone(),
    };

    Json(response)
}

/// Liveness: answers as long as the process serves requests.
pub(crate) async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { service: SERVICE_NAME, status: "healthy" })
}

/// Readiness: reports the exam store and whether the generative service has credentials.
pub(crate) async fn ready(
    State(state): State<AppState>,
) -> (StatusCode, Json<ReadinessResponse>) {
    let mut status = "ready".to_string();
    let mut code = StatusCode::OK;
    let mut components = HashMap::new();

    let store = state.pipeline().store();
    match store.health().await {
        StoreHealth::Healthy => {
            components.insert(store.backend().to_string(), "healthy".to_string());
        }
        StoreHealth::Unhealthy(error) => {
            components.insert(store.backend().to_string(), format!("unhealthy: {error}"));
            status = "unavailable".to_string();
            code = StatusCode::SERVICE_UNAVAILABLE;
        }
    }

    if state.settings().ai().is_configured() {
        components.insert("llm".to_string(), "configured".to_string());
    } else {
        components.insert("llm".to_string(), "not configured".to_string());
        if code == StatusCode::OK {
            status = "degraded".to_string();
        }
    }

    (code, Json(ReadinessResponse { service: SERVICE_NAME, status, components }))
}

pub(crate) async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    if !state.settings().telemetry().prometheus_enabled {
        return StatusCode::NOT_FOUND.into_response();
    }

    match metrics::render() {
        Some(body) => ([(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
            .into_response(),
        None => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}
