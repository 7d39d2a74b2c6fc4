use axum::extract::State;
use axum::Json;

use crate::state::AppState;

/// GET /api/health: liveness check used by clients before each sync pass.
pub async fn health(State(app): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "rules": app.len().await,
    }))
}
