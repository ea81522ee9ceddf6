use std::time::Instant;

use axum::{
    extract::{rejection::JsonRejection, State},
    response::{IntoResponse, Response},
    Json,
};
use tracing::Instrument;
use uuid::Uuid;

use crate::api::chat_adapter::{self, ChatPayload};
use crate::connectors::ConnectorResponse;
use crate::error::RelayError;
use crate::routing::AppState;
use crate::{metrics, sse};

pub async fn chat(
    State(app): State<AppState>,
    payload: Result<Json<ChatPayload>, JsonRejection>,
) -> Response {
    let span = tracing::info_span!("chat", request_id = %Uuid::new_v4());
    handle(app, payload).instrument(span).await
}

async fn handle(app: AppState, payload: Result<Json<ChatPayload>, JsonRejection>) -> Response {
    let started = Instant::now();

    // Credential is checked before the body is parsed.
    if !app.is_configured() {
        return RelayError::NotConfigured.into_response();
    }

    let Json(payload) = match payload {
        Ok(p) => p,
        Err(rejection) => return RelayError::Validation(rejection.body_text()).into_response(),
    };

    // 1) validate and normalize
    let upstream = match chat_adapter::to_chat_request(payload, app.defaults(), app.limits())
        .and_then(chat_adapter::normalize)
    {
        Ok(req) => req,
        Err(e) => return e.into_response(),
    };
    let model = upstream.model.clone();
    let mode = metrics::mode_label(upstream.stream);
    tracing::info!(%model, mode, "chat request");

    // 2) invoke the upstream
    let result = app.invoke(upstream).await;

    // 3) relay
    match result {
        Ok(ConnectorResponse::Streaming(events)) => sse::to_axum_sse(sse::relay(events, model)),
        Ok(ConnectorResponse::NonStreaming(completion)) => {
            metrics::record_usage(&model, &completion.usage);
            record(&model, mode, "ok", started);
            tracing::info!(
                %model,
                input_tokens = completion.usage.input_tokens,
                output_tokens = completion.usage.output_tokens,
                "chat request completed"
            );
            Json(chat_adapter::final_response(model, completion)).into_response()
        }
        Err(err) => {
            record(&model, mode, err.kind(), started);
            err.into_response()
        }
    }
}

fn record(model: &str, mode: &str, status: &str, started: Instant) {
    metrics::REQUESTS_TOTAL
        .with_label_values(&[model, mode, status])
        .inc();
    metrics::REQUEST_DURATION
        .with_label_values(&[model, mode])
        .observe(started.elapsed().as_secs_f64());
}
