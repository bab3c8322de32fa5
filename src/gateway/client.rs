//! EigenFlow REST API client for LP margin data.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::config::GatewayConfig;

use super::traits::MarginDataProvider;
use super::types::MarginSnapshot;
use super::GatewayError;

/// One LP account row as returned by the upstream API.
///
/// Utilization arrives as a percentage and is normalized to a ratio at this
/// boundary.
#[derive(Debug, Clone, Deserialize)]
struct LpAccount {
    #[serde(rename = "LP")]
    lp: String,
    #[serde(rename = "Margin Utilization %")]
    margin_utilization_pct: Decimal,
    #[serde(rename = "Equity", default)]
    equity: Option<Decimal>,
    #[serde(rename = "Free Margin", default)]
    free_margin: Option<Decimal>,
    #[serde(rename = "updated_at", default)]
    updated_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    access_token: Option<String>,
}

/// EigenFlow API client for LP margin retrieval.
pub struct EigenFlowClient {
    http: Client,
    base_url: String,
    email: String,
    password: String,
    broker: String,
    token: RwLock<Option<String>>,
}

impl EigenFlowClient {
    /// Create a new client from configuration.
    pub fn new(config: &GatewayConfig) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            email: config.email.clone(),
            password: config.password.clone(),
            broker: config.broker.clone(),
            token: RwLock::new(None),
        })
    }

    /// Authenticate and cache the bearer token.
    #[instrument(skip(self))]
    async fn authenticate(&self) -> Result<String, GatewayError> {
        if self.email.is_empty() || self.password.is_empty() || self.broker.is_empty() {
            return Err(GatewayError::Auth(
                "email, password and broker required (MS_GATEWAY__EMAIL / __PASSWORD / __BROKER)"
                    .to_string(),
            ));
        }

        let url = format!("{}/auth", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({
                "email": self.email,
                "password": self.password,
                "broker": self.broker,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Auth(format!(
                "authentication failed: {} - {}",
                status, body
            )));
        }

        let auth: AuthResponse = response.json().await?;
        let token = auth
            .access_token
            .ok_or_else(|| GatewayError::Auth("no access token received".to_string()))?;

        info!("Authenticated with EigenFlow API");
        *self.token.write().await = Some(token.clone());
        Ok(token)
    }

    async fn token(&self) -> Result<String, GatewayError> {
        if let Some(token) = self.token.read().await.clone() {
            return Ok(token);
        }
        self.authenticate().await
    }

    /// Fetch LP account rows, re-authenticating once on an expired token.
    async fn fetch_accounts(&self, lp_name: Option<&str>) -> Result<Vec<LpAccount>, GatewayError> {
        let url = format!("{}/lp/account", self.base_url);

        for attempt in 0..2 {
            let token = self.token().await?;
            let mut request = self.http.get(&url).bearer_auth(&token);
            if let Some(name) = lp_name {
                request = request.query(&[("lp_name", name)]);
            }

            let response = request.send().await?;

            if response.status() == StatusCode::UNAUTHORIZED && attempt == 0 {
                warn!("Gateway token expired, re-authenticating");
                *self.token.write().await = None;
                continue;
            }

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(GatewayError::Malformed(format!(
                    "account request failed: {} - {}",
                    status, body
                )));
            }

            // The API returns a list for all LPs and a bare object for one
            let value: serde_json::Value = response.json().await?;
            let accounts = match value {
                serde_json::Value::Array(items) => items
                    .into_iter()
                    .map(serde_json::from_value)
                    .collect::<Result<Vec<LpAccount>, _>>()
                    .map_err(|e| GatewayError::Malformed(e.to_string()))?,
                other => vec![serde_json::from_value(other)
                    .map_err(|e| GatewayError::Malformed(e.to_string()))?],
            };

            debug!(count = accounts.len(), "Retrieved LP account data");
            return Ok(accounts);
        }

        Err(GatewayError::Auth(
            "token rejected after re-authentication".to_string(),
        ))
    }

    fn to_snapshot(account: LpAccount) -> MarginSnapshot {
        let updated_at = account.updated_at.as_deref().and_then(parse_timestamp);
        MarginSnapshot {
            lp: account.lp,
            margin_utilization: account.margin_utilization_pct / dec!(100),
            equity: account.equity,
            free_margin: account.free_margin,
            updated_at,
        }
    }
}

/// The upstream formats timestamps as naive "YYYY-MM-DD HH:MM:SS" in UTC.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

#[async_trait]
impl MarginDataProvider for EigenFlowClient {
    async fn lp_identifiers(&self) -> Result<Vec<String>, GatewayError> {
        let accounts = self.fetch_accounts(None).await?;
        Ok(accounts.into_iter().map(|a| a.lp).collect())
    }

    async fn margin_for(&self, lp: &str) -> Result<MarginSnapshot, GatewayError> {
        let accounts = self.fetch_accounts(Some(lp)).await?;
        accounts
            .into_iter()
            .find(|a| a.lp == lp)
            .map(Self::to_snapshot)
            .ok_or_else(|| GatewayError::UnknownLp(lp.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: &str) -> GatewayConfig {
        GatewayConfig {
            base_url: base_url.to_string(),
            email: "ops@example.com".to_string(),
            password: "secret".to_string(),
            broker: "broker-hash".to_string(),
            timeout_secs: 5,
        }
    }

    async fn mount_auth(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/auth"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "access_token": "token-123"
                })),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_fetch_all_lps_converts_percent_to_ratio() {
        let server = MockServer::start().await;
        mount_auth(&server).await;

        Mock::given(method("GET"))
            .and(path("/lp/account"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {
                    "LP": "[CFH] MAJESTIC FIN TRADE",
                    "Margin Utilization %": 82.5,
                    "Equity": 150000.0,
                    "Free Margin": 26250.0,
                    "updated_at": "2026-08-29 10:15:00"
                },
                {
                    "LP": "[GBEGlobal]GBEGlobal1",
                    "Margin Utilization %": 12.0
                }
            ])))
            .mount(&server)
            .await;

        let client = EigenFlowClient::new(&test_config(&server.uri())).unwrap();

        let lps = client.lp_identifiers().await.unwrap();
        assert_eq!(lps.len(), 2);

        let snap = client.margin_for("[CFH] MAJESTIC FIN TRADE").await.unwrap();
        assert_eq!(snap.margin_utilization, rust_decimal_macros::dec!(0.825));
        assert!(snap.updated_at.is_some());
    }

    #[tokio::test]
    async fn test_single_lp_query_uses_name_param() {
        let server = MockServer::start().await;
        mount_auth(&server).await;

        Mock::given(method("GET"))
            .and(path("/lp/account"))
            .and(query_param("lp_name", "[GBEGlobal]GBEGlobal1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "LP": "[GBEGlobal]GBEGlobal1",
                "Margin Utilization %": 95.0
            })))
            .mount(&server)
            .await;

        let client = EigenFlowClient::new(&test_config(&server.uri())).unwrap();
        let snap = client.margin_for("[GBEGlobal]GBEGlobal1").await.unwrap();
        assert_eq!(snap.margin_utilization, rust_decimal_macros::dec!(0.95));
    }

    #[tokio::test]
    async fn test_unknown_lp() {
        let server = MockServer::start().await;
        mount_auth(&server).await;

        Mock::given(method("GET"))
            .and(path("/lp/account"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;

        let client = EigenFlowClient::new(&test_config(&server.uri())).unwrap();
        let err = client.margin_for("NOPE").await;
        assert!(matches!(err, Err(GatewayError::UnknownLp(_))));
    }

    #[tokio::test]
    async fn test_auth_rejection() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/auth"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad credentials"))
            .mount(&server)
            .await;

        let client = EigenFlowClient::new(&test_config(&server.uri())).unwrap();
        let err = client.lp_identifiers().await;
        assert!(matches!(err, Err(GatewayError::Auth(_))));
    }

    #[tokio::test]
    async fn test_missing_credentials_rejected_before_any_call() {
        let server = MockServer::start().await;
        let mut config = test_config(&server.uri());
        config.email = String::new();

        let client = EigenFlowClient::new(&config).unwrap();
        let err = client.lp_identifiers().await;
        assert!(matches!(err, Err(GatewayError::Auth(_))));
    }

    #[test]
    fn test_parse_timestamp() {
        assert!(parse_timestamp("2026-08-29 10:15:00").is_some());
        assert!(parse_timestamp("not a timestamp").is_none());
    }
}
