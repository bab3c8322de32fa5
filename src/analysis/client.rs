//! HTTP client for the analysis service.

use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::config::AnalysisConfig;

/// Outcome reported by the analysis service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Completed,
    AwaitingApproval,
    Error,
}

/// Normalized analysis result.
///
/// `thread_id` is passed through exactly as received so recheck calls
/// correlate to the same external conversation. `raw` keeps the unmodified
/// response body for the card's report log.
#[derive(Debug, Clone)]
pub struct Report {
    pub thread_id: String,
    pub status: ReportStatus,
    pub content: Option<String>,
    pub interrupt: Option<serde_json::Value>,
    pub raw: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ReportWire {
    thread_id: String,
    status: ReportStatus,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    interrupt: Option<serde_json::Value>,
}

/// Failures from the analysis service, distinguishable by the caller.
/// These never escape as panics; the monitoring loop logs and continues.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("analysis call timed out after {0}s")]
    Timeout(u64),

    #[error("analysis request failed: {0}")]
    Http(reqwest::Error),

    #[error("malformed analysis response: {0}")]
    Malformed(String),
}

/// Client for the report generation pipeline.
pub struct AnalysisClient {
    http: Client,
    initial_url: String,
    recheck_url: String,
    timeout_secs: u64,
}

impl AnalysisClient {
    /// Create a new analysis client from configuration.
    pub fn new(config: &AnalysisConfig) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            http,
            initial_url: config.initial_url.clone(),
            recheck_url: config.recheck_url.clone(),
            timeout_secs: config.timeout_secs,
        })
    }

    /// Request the first risk report for a fresh alert card.
    #[instrument(skip(self))]
    pub async fn request_initial(
        &self,
        lp: &str,
        margin_level: Decimal,
        threshold: Decimal,
    ) -> Result<Report, AnalysisError> {
        let body = serde_json::json!({
            "lp": lp,
            "margin_level": margin_level,
            "threshold": threshold,
        });
        self.call(&self.initial_url, body).await
    }

    /// Re-evaluate an existing conversation after human feedback.
    #[instrument(skip(self))]
    pub async fn request_recheck(&self, thread_id: &str) -> Result<Report, AnalysisError> {
        let body = serde_json::json!({ "thread_id": thread_id });
        self.call(&self.recheck_url, body).await
    }

    async fn call(
        &self,
        url: &str,
        body: serde_json::Value,
    ) -> Result<Report, AnalysisError> {
        let response = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let response = response.error_for_status().map_err(AnalysisError::Http)?;

        let raw: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AnalysisError::Malformed(e.to_string()))?;

        let wire: ReportWire = serde_json::from_value(raw.clone())
            .map_err(|e| AnalysisError::Malformed(e.to_string()))?;

        debug!(thread_id = %wire.thread_id, status = ?wire.status, "Analysis report received");

        Ok(Report {
            thread_id: wire.thread_id,
            status: wire.status,
            content: wire.content,
            interrupt: wire.interrupt,
            raw,
        })
    }

    fn classify(&self, error: reqwest::Error) -> AnalysisError {
        if error.is_timeout() {
            AnalysisError::Timeout(self.timeout_secs)
        } else {
            AnalysisError::Http(error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(server: &MockServer, timeout_secs: u64) -> AnalysisClient {
        AnalysisClient::new(&AnalysisConfig {
            initial_url: format!("{}/report/initial", server.uri()),
            recheck_url: format!("{}/report/recheck", server.uri()),
            timeout_secs,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_initial_report_success() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/report/initial"))
            .and(body_partial_json(serde_json::json!({"lp": "LP-A"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "thread_id": "thread-42",
                "status": "completed",
                "content": "Margin utilization at 96%, recommend cross netting."
            })))
            .mount(&server)
            .await;

        let client = test_client(&server, 5);
        let report = client
            .request_initial("LP-A", dec!(0.96), dec!(0.90))
            .await
            .unwrap();

        assert_eq!(report.thread_id, "thread-42");
        assert_eq!(report.status, ReportStatus::Completed);
        assert!(report.content.unwrap().contains("96%"));
        assert_eq!(report.raw["thread_id"], "thread-42");
    }

    #[tokio::test]
    async fn test_recheck_passes_thread_id_through() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/report/recheck"))
            .and(body_partial_json(serde_json::json!({"thread_id": "thread-42"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "thread_id": "thread-42",
                "status": "awaiting_approval",
                "interrupt": {"question": "Approve the proposed netting?"}
            })))
            .mount(&server)
            .await;

        let client = test_client(&server, 5);
        let report = client.request_recheck("thread-42").await.unwrap();

        assert_eq!(report.thread_id, "thread-42");
        assert_eq!(report.status, ReportStatus::AwaitingApproval);
        assert!(report.interrupt.is_some());
        assert!(report.content.is_none());
    }

    #[tokio::test]
    async fn test_timeout_is_distinguishable() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/report/initial"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({
                        "thread_id": "t", "status": "completed"
                    }))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let client = test_client(&server, 1);
        let err = client
            .request_initial("LP-A", dec!(0.96), dec!(0.90))
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::Timeout(1)));
    }

    #[tokio::test]
    async fn test_server_error_is_http_failure() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/report/recheck"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = test_client(&server, 5);
        let err = client.request_recheck("thread-42").await.unwrap_err();
        assert!(matches!(err, AnalysisError::Http(_)));
    }

    #[tokio::test]
    async fn test_malformed_response() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/report/initial"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "completed"
            })))
            .mount(&server)
            .await;

        let client = test_client(&server, 5);
        let err = client
            .request_initial("LP-A", dec!(0.96), dec!(0.90))
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::Malformed(_)));
    }
}
