use crate::circuit_breaker::{
    create_relay_circuit_breaker, retry_with_backoff, RelayCircuitBreaker, RetryPolicy,
};
use crate::errors::AppError;
use chrono::Utc;
use failsafe::futures::CircuitBreaker;
use serde_json::json;
use std::time::Duration;

/// Client for the relay webhook that mirrors tag changes into the CRM.
#[derive(Clone)]
pub struct CrmRelayClient {
    client: reqwest::Client,
    url: String,
    breaker: RelayCircuitBreaker,
    retry: RetryPolicy,
}

impl CrmRelayClient {
    /// Creates a new `CrmRelayClient`.
    ///
    /// # Arguments
    ///
    /// * `url` - The relay webhook URL.
    /// * `retry_attempts` - Attempts per push before counting a breaker failure.
    pub fn new(url: String, retry_attempts: u32) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| {
                AppError::ExternalApiError(format!("Failed to create relay client: {}", e))
            })?;

        Ok(Self {
            client,
            url,
            breaker: create_relay_circuit_breaker(),
            retry: RetryPolicy::with_attempts(retry_attempts),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Pushes a tag change for `phone` to the CRM relay.
    ///
    /// Retried with jittered backoff; a run of exhausted retries opens the
    /// breaker, after which pushes fail fast until it half-opens.
    pub async fn push_tag(&self, phone: &str, name: &str, tag: &str) -> Result<(), AppError> {
        let body = json!({
            "event": "tag",
            "phone": phone,
            "name": name,
            "tag": tag,
            "timestamp": Utc::now().to_rfc3339(),
        });

        let attempt = || self.post_once(&body);
        let result = self
            .breaker
            .call(retry_with_backoff("CRM relay push", self.retry, attempt))
            .await;

        match result {
            Ok(()) => {
                tracing::info!("Relayed tag '{}' for {}", tag, phone);
                Ok(())
            }
            Err(failsafe::Error::Rejected) => {
                tracing::warn!("CRM relay circuit open, skipping tag push for {}", phone);
                Err(AppError::ExternalApiError(
                    "CRM relay circuit breaker is open".to_string(),
                ))
            }
            Err(failsafe::Error::Inner(e)) => Err(e),
        }
    }

    async fn post_once(&self, body: &serde_json::Value) -> Result<(), AppError> {
        let response = self
            .client
            .post(&self.url)
            .json(body)
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("CRM relay request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::ExternalApiError(format!(
                "CRM relay returned {}: {}",
                status, error_text
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_client_creation() {
        let client = CrmRelayClient::new("http://localhost:9999/relay".to_string(), 3);
        assert!(client.is_ok());
    }
}
