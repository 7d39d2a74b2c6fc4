use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuleSyncError {
    #[error("not initialized: run 'rulesync init'")]
    NotInitialized,

    #[error("rule not found: {0}")]
    RuleNotFound(String),

    #[error("invalid rule id '{0}': use letters, digits, '-', '_' or '.'")]
    InvalidRuleId(String),

    #[error("invalid rule '{id}': {reason}")]
    Validation { id: String, reason: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("timed out after {}ms: {op}", .after.as_millis())]
    Timeout { op: String, after: Duration },

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("server returned {status}: {body}")]
    Server { status: u16, body: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl RuleSyncError {
    pub fn validation(id: impl Into<String>, reason: impl Into<String>) -> Self {
        RuleSyncError::Validation {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Errors worth another attempt: the remote may answer next time.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RuleSyncError::Network(_) | RuleSyncError::Timeout { .. }
        )
    }
}

impl From<reqwest::Error> for RuleSyncError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RuleSyncError::Timeout {
                op: e
                    .url()
                    .map(|u| u.path().to_string())
                    .unwrap_or_else(|| "request".to_string()),
                after: Duration::ZERO,
            }
        } else if e.is_decode() {
            RuleSyncError::Server {
                status: e.status().map(|s| s.as_u16()).unwrap_or(0),
                body: format!("malformed response: {e}"),
            }
        } else {
            RuleSyncError::Network(e.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, RuleSyncError>;
