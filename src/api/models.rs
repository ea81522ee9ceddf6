use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::routing::AppState;

pub async fn list_models(State(app): State<AppState>) -> Json<Value> {
    Json(json!({ "models": app.models() }))
}
