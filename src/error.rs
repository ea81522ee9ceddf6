use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("{0}")]
    Validation(String),
    #[error("Anthropic API key not configured. Please set ANTHROPIC_API_KEY.")]
    NotConfigured,
    #[error("Anthropic API error: {0}")]
    Upstream(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl RelayError {
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::Validation(_) => "validation",
            RelayError::NotConfigured => "not_configured",
            RelayError::Upstream(_) => "upstream",
            RelayError::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::Validation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to hand to the client. Internal detail stays in the logs.
    pub fn public_message(&self) -> String {
        match self {
            RelayError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RelayError::Upstream("request timed out".into())
        } else {
            RelayError::Upstream(e.to_string())
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        match &self {
            RelayError::Internal(detail) => tracing::error!(%detail, "internal fault"),
            RelayError::Upstream(detail) => tracing::error!(%detail, "upstream call failed"),
            RelayError::NotConfigured => tracing::warn!("chat request rejected: no API key"),
            RelayError::Validation(detail) => tracing::debug!(%detail, "invalid chat request"),
        }
        let body = serde_json::json!({ "error": self.public_message() });
        (self.status(), Json(body)).into_response()
    }
}
