use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use rulesync_core::error::RuleSyncError;

// ---------------------------------------------------------------------------
// AppError: unified error type for HTTP responses
// ---------------------------------------------------------------------------

/// Unified error type for HTTP responses.
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    /// Construct a 404 Not Found error for a rule id.
    pub fn not_found(id: impl Into<String>) -> Self {
        Self(RuleSyncError::RuleNotFound(id.into()).into())
    }
}

fn status_for(e: &RuleSyncError) -> StatusCode {
    match e {
        RuleSyncError::RuleNotFound(_) => StatusCode::NOT_FOUND,
        RuleSyncError::InvalidRuleId(_) | RuleSyncError::Validation { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        RuleSyncError::Network(_) | RuleSyncError::Timeout { .. } => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        RuleSyncError::NotInitialized
        | RuleSyncError::Persistence(_)
        | RuleSyncError::Server { .. }
        | RuleSyncError::Io(_)
        | RuleSyncError::Yaml(_)
        | RuleSyncError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self
            .0
            .downcast_ref::<RuleSyncError>()
            .map(status_for)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::warn!(error = %self.0, "request failed");
        }
        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
