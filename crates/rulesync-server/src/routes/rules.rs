use axum::extract::{Path, State};
use axum::Json;
use rulesync_core::remote::{DeleteResponse, IdsRequest};
use rulesync_core::Rule;

use crate::error::AppError;
use crate::state::AppState;

/// GET /api/rules: every rule, ordered by id.
pub async fn list_rules(State(app): State<AppState>) -> Json<Vec<Rule>> {
    Json(app.list().await)
}

/// GET /api/rules/{id}
pub async fn get_rule(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Rule>, AppError> {
    match app.get(&id).await {
        Some(rule) => Ok(Json(rule)),
        None => Err(AppError::not_found(id)),
    }
}

/// POST /api/rules: create or replace a batch; replies with the stored copies.
pub async fn upload_rules(
    State(app): State<AppState>,
    Json(rules): Json<Vec<Rule>>,
) -> Result<Json<Vec<Rule>>, AppError> {
    let stored = app.upsert(rules).await?;
    Ok(Json(stored))
}

/// POST /api/rules/download: the requested rules that exist.
pub async fn download_rules(
    State(app): State<AppState>,
    Json(body): Json<IdsRequest>,
) -> Json<Vec<Rule>> {
    Json(app.get_many(&body.ids).await)
}

/// POST /api/rules/delete: replies with every id now absent.
pub async fn delete_rules(
    State(app): State<AppState>,
    Json(body): Json<IdsRequest>,
) -> Result<Json<DeleteResponse>, AppError> {
    let deleted = app.delete(&body.ids).await?;
    Ok(Json(DeleteResponse { deleted }))
}
