pub mod api;
pub mod config;
pub mod connectors;
pub mod core;
pub mod error;
pub mod metrics;
pub mod observability;
pub mod routing;
pub mod sse;

use std::any::Any as PanicPayload;

use axum::{
    extract::DefaultBodyLimit,
    http::HeaderValue,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::config::RelayConfig;
use crate::routing::AppState;

/// Builds the HTTP surface around an already constructed `AppState`.
pub fn app(state: AppState, config: &RelayConfig) -> Router {
    Router::new()
        .route("/api/health", get(api::health::health))
        .route("/api/chat", post(api::chat::chat))
        .route("/api/models", get(api::models::list_models))
        .route("/metrics", get(metrics::metrics_handler))
        .with_state(state)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(DefaultBodyLimit::max(config.limits.max_body_bytes()))
        .layer(cors_layer(&config.server.cors_origins))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// A handler that panicked answers like any other internal fault.
fn panic_response(payload: Box<dyn PanicPayload + Send + 'static>) -> Response {
    let detail = if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else {
        "handler panicked".to_string()
    };
    error::RelayError::Internal(format!("panic: {detail}")).into_response()
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return base.allow_origin(Any);
    }
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    base.allow_origin(AllowOrigin::list(parsed))
}
