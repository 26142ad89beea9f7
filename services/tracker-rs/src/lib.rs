//! Portfolio tracking service: accept analytics beacons over HTTP and
//! forward them to a Kafka topic without making the caller wait.

pub mod config;
pub mod coordinator;
pub mod enums;
pub mod error;
pub mod event;
pub mod handlers;
pub mod kafka;
pub mod metrics;
pub mod models;
pub mod pool;
pub mod rest;
pub mod state;
pub mod transport;

use axum::{
    http::{header, HeaderValue},
    routing::get,
    Router,
};
use std::sync::Arc;
use tower_http::{
    catch_panic::CatchPanicLayer, set_header::SetResponseHeaderLayer, trace::TraceLayer,
};

use crate::state::AppState;

pub const CORS_ALLOW_ORIGIN: &str = "*";
pub const CORS_ALLOW_METHODS: &str = "POST, GET, OPTIONS";
pub const CORS_ALLOW_HEADERS: &str = "Content-Type";

/// Build the service router. CORS headers are set outermost so they also
/// land on 405s and on 500s produced from a caught panic.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route(
            "/track",
            get(handlers::track_probe)
                .post(handlers::track_event)
                .options(handlers::track_preflight)
                .fallback(handlers::method_not_allowed),
        )
        .layer(CatchPanicLayer::custom(handlers::panic_response))
        .layer(TraceLayer::new_for_http())
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static(CORS_ALLOW_ORIGIN),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(CORS_ALLOW_METHODS),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(CORS_ALLOW_HEADERS),
        ))
        .with_state(state)
}
