use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::scheduler::Sweeper;

#[derive(Clone)]
pub struct AppState {
    pub sweeper: Arc<Sweeper>,
    pub api_key: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/sweep", post(handle_sweep))
        .route("/report", get(handle_report))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_key))
        .route("/health", get(handle_health))
        .with_state(state)
}

async fn require_key(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(expected) = state.api_key.as_deref() else {
        return next.run(req).await;
    };
    let presented = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if presented == Some(expected) {
        next.run(req).await
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"error": "unauthorized"})),
        )
            .into_response()
    }
}

async fn handle_sweep(State(state): State<AppState>) -> Response {
    match state.sweeper.sweep_now().await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => {
            tracing::error!("Manual sweep failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": e.to_string(), "kind": e.kind()})),
            )
                .into_response()
        }
    }
}

async fn handle_report(State(state): State<AppState>) -> Response {
    match state.sweeper.last_report() {
        Some(report) => Json(report).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "no sweep has completed yet"})),
        )
            .into_response(),
    }
}

async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
