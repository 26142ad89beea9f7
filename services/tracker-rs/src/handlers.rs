//! HTTP handlers for the tracking service.
//!
//! ```text
//! POST    /track ─▶ parse_body ─▶ coordinator.handle ─▶ 200 (delivery detached)
//! GET     /track ─▶ config + pool state snapshot        (never connects)
//! OPTIONS /track ─▶ 200, empty body (CORS preflight)
//! other   /track ─▶ 405
//! ```
//!
//! CORS headers are attached by the router, not here.

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{SecondsFormat, Utc};
use std::any::Any;
use std::sync::Arc;

use crate::enums::HealthStatus;
use crate::event;
use crate::models::{HealthResponse, TrackFailure, TrackStatus};
use crate::state::AppState;

// ── Health ────────────────────────────────────────────────────────────────────

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    state.metrics.http("health", "GET", 200);
    Json(HealthResponse {
        status: HealthStatus::Healthy,
        broker: state.coordinator.producer_state().await,
    })
}

// ── Metrics ───────────────────────────────────────────────────────────────────

pub async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    match crate::metrics::gather(&state.registry) {
        Ok(text) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("metrics encoding failed: {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

// ── /track ────────────────────────────────────────────────────────────────────

pub async fn track_event(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let payload = event::parse_body(&body);
    // Delivery runs detached; its JoinHandle is not awaited.
    let (accepted, _delivery) = state.coordinator.handle(&payload, &headers);
    state.metrics.http("track", "POST", 200);
    Json(accepted).into_response()
}

pub async fn track_probe(State(state): State<Arc<AppState>>) -> Json<TrackStatus> {
    state.metrics.http("track", "GET", 200);
    Json(TrackStatus {
        status: "Track API is working".to_string(),
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        kafka_available: state.config.kafka_available(),
        transport: state.coordinator.transport(),
        producer: state.coordinator.producer_state().await,
    })
}

pub async fn track_preflight(State(state): State<Arc<AppState>>) -> StatusCode {
    state.metrics.http("track", "OPTIONS", 200);
    StatusCode::OK
}

pub async fn method_not_allowed() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(serde_json::json!({ "error": "Method not allowed" })),
    )
        .into_response()
}

// ── Panics ────────────────────────────────────────────────────────────────────

/// Turn a panic caught by `CatchPanicLayer` into the tracking failure body.
pub fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let message = if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown error".to_string()
    };
    tracing::error!(%message, "request handler panicked");

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(TrackFailure {
            success: false,
            error: "Failed to process tracking event".to_string(),
            message,
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn panic_with_string_payload() {
        let response = panic_response(Box::new(format!("boom {}", 7)));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "Failed to process tracking event");
        assert_eq!(body["message"], "boom 7");
    }

    #[tokio::test]
    async fn panic_with_opaque_payload() {
        let response = panic_response(Box::new(42_u8));
        let body = body_json(response).await;
        assert_eq!(body["message"], "unknown error");
    }

    #[tokio::test]
    async fn not_allowed_body() {
        let response = method_not_allowed().await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(body_json(response).await["error"], "Method not allowed");
    }
}
