//! reqwest-backed Bitrix24 client

use super::CrmClient;
use crate::error::{BridgeError, BridgeResult};
use crate::metrics::BridgeMetrics;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// Bitrix24 REST client
#[derive(Clone)]
pub struct BitrixClient {
    http_client: Client,
    metrics: Option<BridgeMetrics>,
}

impl BitrixClient {
    /// Create a client with the given request timeout
    pub fn new(timeout: Duration) -> BridgeResult<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("CRM-Bridge-Service/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BridgeError::internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            metrics: None,
        })
    }

    /// Count outbound calls in `metrics`
    pub fn with_metrics(mut self, metrics: BridgeMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// `<base>/<method>.json`, tolerating a trailing slash on the base
    pub fn method_url(base_url: &str, method: &str) -> String {
        format!("{}/{}.json", base_url.trim().trim_end_matches('/'), method)
    }

    async fn execute(&self, base_url: &str, method: &str, body: Value) -> BridgeResult<Value> {
        let url = Self::method_url(base_url, method);
        debug!(method = method, "Calling CRM");

        let response = self
            .http_client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(method, e))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| transport_error(method, e))?;

        let parsed: Option<Value> = serde_json::from_str(&text).ok();
        let error_code = parsed
            .as_ref()
            .and_then(|v| v.get("error"))
            .filter(|e| !e.is_null() && e.as_str() != Some(""))
            .map(|e| match e {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            });

        if !status.is_success() || error_code.is_some() {
            let description = parsed
                .as_ref()
                .and_then(|v| v.get("error_description"))
                .and_then(Value::as_str)
                .filter(|d| !d.is_empty())
                .map(str::to_string);

            let code = error_code
                .clone()
                .unwrap_or_else(|| status.as_u16().to_string());
            let message = description
                .or(error_code)
                .unwrap_or_else(|| "Unknown error".to_string());

            warn!(
                method = method,
                status = status.as_u16(),
                code = %code,
                "CRM call failed"
            );
            return Err(BridgeError::upstream(code, message));
        }

        let parsed = parsed.ok_or_else(|| {
            BridgeError::upstream("INVALID_RESPONSE", "CRM returned a non-JSON body")
        })?;

        Ok(parsed.get("result").cloned().unwrap_or(Value::Null))
    }
}

/// CRM unreachable or the exchange broke off mid-way
fn transport_error(method: &str, error: reqwest::Error) -> BridgeError {
    let code = if error.is_timeout() {
        "TIMEOUT"
    } else {
        "TRANSPORT_ERROR"
    };
    warn!(method = method, code = code, error = %error, "CRM unreachable");
    BridgeError::upstream(code, error.to_string())
}

#[async_trait]
impl CrmClient for BitrixClient {
    async fn call(&self, base_url: &str, method: &str, body: Value) -> BridgeResult<Value> {
        let outcome = self.execute(base_url, method, body).await;
        if let Some(ref metrics) = self.metrics {
            metrics.record_crm_call(method, outcome.is_ok());
        }
        outcome
    }
}
