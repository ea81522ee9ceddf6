use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, Encoder, HistogramVec,
    IntCounterVec, IntGauge, TextEncoder,
};

use crate::core::entities::Usage;

lazy_static! {
    /// Chat requests by outcome
    pub static ref REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "relay_requests_total",
        "Total number of chat requests processed",
        &["model", "mode", "status"]
    )
    .unwrap();

    /// Time from request arrival to last byte
    pub static ref REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        "relay_request_duration_seconds",
        "Chat request duration in seconds",
        &["model", "mode"],
        vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]
    )
    .unwrap();

    /// Tokens as reported by the upstream
    pub static ref TOKENS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "relay_tokens_total",
        "Tokens reported by the upstream provider",
        &["model", "type"]
    )
    .unwrap();

    pub static ref ACTIVE_STREAMS: IntGauge =
        register_int_gauge!("relay_active_streams", "Number of open streaming responses").unwrap();

    /// Upstream failures by HTTP status or `stream`
    pub static ref UPSTREAM_ERRORS: IntCounterVec = register_int_counter_vec!(
        "relay_upstream_errors_total",
        "Total number of upstream failures",
        &["kind"]
    )
    .unwrap();
}

pub fn mode_label(stream: bool) -> &'static str {
    if stream {
        "stream"
    } else {
        "blocking"
    }
}

pub fn record_usage(model: &str, usage: &Usage) {
    TOKENS_TOTAL
        .with_label_values(&[model, "input"])
        .inc_by(usage.input_tokens);
    TOKENS_TOTAL
        .with_label_values(&[model, "output"])
        .inc_by(usage.output_tokens);
}

/// `GET /metrics`: every registered relay metric in the text exposition format.
pub async fn metrics_handler() -> Response {
    let mut body = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&prometheus::gather(), &mut body) {
        tracing::error!(error = %e, "metrics encoding failed");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response()
}
