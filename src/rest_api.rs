//! REST collaborators: the 2s status poll and strategy persistence.

use std::future::Future;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::coerce::field_str;
use crate::reconciler::CandleBatch;
use crate::types::AuditEntry;
use crate::wire;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Network, timeout or 5xx — safe to retry / skip this tick.
    #[error("transient error: {0}")]
    Transient(String),
    /// 4xx other than 404 — retrying will not help.
    #[error("permanent error: {0}")]
    Permanent(String),
    /// 404 from the status endpoint: the strategy is not running.
    #[error("strategy not running")]
    NotFound,
    /// Unparsable body. The poll tick is discarded, previous state retained.
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Generic retry wrapper with capped exponential backoff. Only transient
/// failures are retried.
pub async fn with_retry<F, Fut, T>(operation: F, max_retries: u32) -> Result<T, ApiError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut retries = 0;
    let mut delay: u64 = 1;
    loop {
        match operation().await {
            Ok(r) => return Ok(r),
            Err(ApiError::Transient(msg)) => {
                if retries >= max_retries {
                    return Err(ApiError::Transient(msg));
                }
                log::warn!("Transient error: {} — retry in {}s ({}/{})", msg, delay, retries + 1, max_retries);
                tokio::time::sleep(Duration::from_secs(delay)).await;
                delay = (delay * 2).min(30);
                retries += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// A successful poll, pre-split into the pieces the reconciler consumes.
#[derive(Debug)]
pub struct StatusSnapshot {
    pub metrics: Value,
    pub audit_trail: Vec<AuditEntry>,
    pub candles: Option<CandleBatch>,
}

#[derive(Clone)]
pub struct StatusClient {
    client: reqwest::Client,
    base_url: String,
}

impl StatusClient {
    pub fn with_base_url(base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .expect("HTTP client build failed");
        StatusClient { client, base_url: base_url.to_string() }
    }

    /// One poll tick. 404 maps to `ApiError::NotFound` so the loop can feed
    /// the reconciler an explicit not-running event.
    pub async fn fetch_status(&self, strategy_id: &str) -> Result<StatusSnapshot, ApiError> {
        let url = format!("{}/strategy/status/{}", self.base_url, strategy_id);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ApiError::Transient(format!("HTTP error: {}", e)))?;

        let status = resp.status();
        if status.as_u16() == 404 {
            return Err(ApiError::NotFound);
        }
        if status.is_server_error() {
            return Err(ApiError::Transient(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            return Err(ApiError::Permanent(format!("HTTP {}", status)));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| ApiError::Malformed(format!("parse error: {}", e)))?;
        if !body.is_object() {
            return Err(ApiError::Malformed("status body is not an object".into()));
        }

        Ok(StatusSnapshot {
            audit_trail: wire::parse_audit_entries(&body),
            candles: wire::parse_candle_batch(&body),
            metrics: body,
        })
    }
}

#[derive(Clone)]
pub struct PersistenceClient {
    client: reqwest::Client,
    base_url: String,
}

impl PersistenceClient {
    pub fn with_base_url(base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .expect("HTTP client build failed");
        PersistenceClient { client, base_url: base_url.to_string() }
    }

    async fn save_raw(&self, payload: &Value) -> Result<String, ApiError> {
        let url = format!("{}/strategy/save", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(payload)
            .send()
            .await
            .map_err(|e| ApiError::Transient(format!("HTTP error: {}", e)))?;

        let status = resp.status();
        if status.is_server_error() {
            return Err(ApiError::Transient(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            return Err(ApiError::Permanent(format!("HTTP {}", status)));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| ApiError::Malformed(format!("parse error: {}", e)))?;
        field_str(&body, &["strategy_id", "id"])
            .ok_or_else(|| ApiError::Malformed("save response carries no id".into()))
    }

    /// Persist a serialized StrategyDefinition. Transient failures retried.
    /// Returns the backend-generated identifier.
    pub async fn save_strategy(&self, payload: &Value) -> Result<String, ApiError> {
        let s = self.clone();
        let payload = payload.clone();
        with_retry(
            || {
                let s = s.clone();
                let payload = payload.clone();
                async move { s.save_raw(&payload).await }
            },
            3,
        )
        .await
    }
}
