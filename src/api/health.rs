use axum::{extract::State, Json};
use serde::Serialize;

use crate::routing::AppState;

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub anthropic_configured: bool,
}

pub async fn health(State(app): State<AppState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "healthy",
        anthropic_configured: app.is_configured(),
    })
}
