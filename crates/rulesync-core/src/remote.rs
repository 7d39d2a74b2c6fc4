//! The rule server as seen by the sync core.

use crate::error::{Result, RuleSyncError};
use crate::types::Rule;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Remote rule storage. Every call may fail with a network or timeout error.
#[async_trait]
pub trait RuleServer: Send + Sync {
    async fn list_rules(&self) -> Result<Vec<Rule>>;

    /// Store `rules`; the reply carries server-assigned metadata.
    async fn upload_rules(&self, rules: &[Rule]) -> Result<Vec<Rule>>;

    async fn download_rules(&self, ids: &[String]) -> Result<Vec<Rule>>;

    /// Delete `ids`; the reply lists the ids the server confirms as gone.
    /// Deleting an unknown id is confirmed too.
    async fn delete_rules(&self, ids: &[String]) -> Result<Vec<String>>;

    async fn check_connection(&self) -> Result<bool>;
}

// ---------------------------------------------------------------------------
// Wire bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdsRequest {
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub deleted: Vec<String>,
}

// ---------------------------------------------------------------------------
// HttpRuleServer
// ---------------------------------------------------------------------------

/// JSON-over-HTTP client for the `rulesync-server` API.
#[derive(Debug, Clone)]
pub struct HttpRuleServer {
    base_url: String,
    client: reqwest::Client,
}

impl HttpRuleServer {
    /// `timeout` bounds each request at the HTTP layer as well; the retry
    /// policy applies its own per-call deadline on top.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RuleSyncError::Network(format!("failed to build http client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Map non-success statuses onto the error taxonomy: 5xx and 429 are
    /// worth retrying, 400/422 mean the payload is bad, the rest is final.
    async fn check(resp: reqwest::Response) -> Result<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        let code = status.as_u16();
        Err(match code {
            429 | 500..=599 => RuleSyncError::Network(format!("server returned {code}: {body}")),
            400 | 422 => RuleSyncError::validation("", body),
            _ => RuleSyncError::Server { status: code, body },
        })
    }
}

#[async_trait]
impl RuleServer for HttpRuleServer {
    async fn list_rules(&self) -> Result<Vec<Rule>> {
        let resp = self.client.get(self.url("/api/rules")).send().await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    async fn upload_rules(&self, rules: &[Rule]) -> Result<Vec<Rule>> {
        let resp = self
            .client
            .post(self.url("/api/rules"))
            .json(rules)
            .send()
            .await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    async fn download_rules(&self, ids: &[String]) -> Result<Vec<Rule>> {
        let resp = self
            .client
            .post(self.url("/api/rules/download"))
            .json(&IdsRequest { ids: ids.to_vec() })
            .send()
            .await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    async fn delete_rules(&self, ids: &[String]) -> Result<Vec<String>> {
        let resp = self
            .client
            .post(self.url("/api/rules/delete"))
            .json(&IdsRequest { ids: ids.to_vec() })
            .send()
            .await?;
        let body: DeleteResponse = Self::check(resp).await?.json().await?;
        Ok(body.deleted)
    }

    async fn check_connection(&self) -> Result<bool> {
        match self.client.get(self.url("/api/health")).send().await {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(e) if e.is_connect() || e.is_timeout() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn rule(id: &str) -> Rule {
        Rule::new(id, format!("{id}.md"), format!("# {id}\n"), Utc::now()).unwrap()
    }

    fn client(server: &mockito::Server) -> HttpRuleServer {
        HttpRuleServer::new(server.url(), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn list_rules_decodes_wire_shape() {
        let mut server = mockito::Server::new_async().await;
        let body = serde_json::to_string(&vec![rule("a"), rule("b")]).unwrap();
        let mock = server
            .mock("GET", "/api/rules")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await;

        let rules = client(&server).list_rules().await.unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[1].id(), "b");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn upload_posts_rules_as_json() {
        let mut server = mockito::Server::new_async().await;
        let sent = vec![rule("a")];
        let mock = server
            .mock("POST", "/api/rules")
            .match_body(mockito::Matcher::Regex(r#""id":"a""#.to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(serde_json::to_string(&sent).unwrap())
            .create_async()
            .await;

        let acked = client(&server).upload_rules(&sent).await.unwrap();
        assert_eq!(acked[0].id(), "a");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn delete_returns_confirmed_ids() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/rules/delete")
            .match_body(mockito::Matcher::Json(serde_json::json!({ "ids": ["x", "y"] })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"deleted":["x"]}"#)
            .create_async()
            .await;

        let ids = vec!["x".to_string(), "y".to_string()];
        let deleted = client(&server).delete_rules(&ids).await.unwrap();
        assert_eq!(deleted, vec!["x".to_string()]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn server_errors_are_transient() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/rules")
            .with_status(503)
            .with_body("maintenance")
            .create_async()
            .await;

        let err = client(&server).list_rules().await.unwrap_err();
        assert!(err.is_transient(), "{err}");
    }

    #[tokio::test]
    async fn unprocessable_is_a_validation_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/rules")
            .with_status(422)
            .with_body(r#"{"error":"content is empty"}"#)
            .create_async()
            .await;

        let err = client(&server).upload_rules(&[rule("a")]).await.unwrap_err();
        assert!(matches!(err, RuleSyncError::Validation { .. }));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn check_connection_reports_health() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/health")
            .with_status(200)
            .with_body("ok")
            .create_async()
            .await;
        assert!(client(&server).check_connection().await.unwrap());
    }

    #[tokio::test]
    async fn check_connection_false_when_unreachable() {
        // Nothing listens on port 9 (discard) in test environments.
        let c = HttpRuleServer::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        assert!(!c.check_connection().await.unwrap());
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let c = HttpRuleServer::new("http://host:1/", Duration::from_secs(1)).unwrap();
        assert_eq!(c.url("/api/rules"), "http://host:1/api/rules");
    }
}
