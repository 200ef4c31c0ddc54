use crate::circuit_breaker::{retry_with_backoff, RetryPolicy};
use crate::config::Config;
use crate::errors::AppError;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const REFINE_MAX_TOKENS: u32 = 400;

const REFINE_SYSTEM_PROMPT: &str = "You rewrite SMS replies for a licensed health insurance agent. \
Apply the requested change and keep every price, phone number and name exactly as written. \
Stay under 320 characters unless the original is longer. Reply with the rewritten message only.";

fn http_client() -> Result<Client, AppError> {
    Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| AppError::ExternalApiError(format!("Failed to create HTTP client: {}", e)))
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

/// Result of a refinement request; `refined` is false when the original was kept.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefinedReply {
    pub adjusted: String,
    pub refined: bool,
}

/// Rewrites suggested replies through the Anthropic Messages API.
#[derive(Clone)]
pub struct ReplyRefiner {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl ReplyRefiner {
    pub fn new(config: &Config) -> Result<Self, AppError> {
        Ok(Self {
            client: http_client()?,
            base_url: config.anthropic_base_url.clone(),
            api_key: config.anthropic_api_key.clone(),
            model: config.anthropic_model.clone(),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.api_key.is_some()
    }

    /// Rewrite `original` following `instruction`.
    ///
    /// # Arguments
    ///
    /// * `original` - The suggested reply.
    /// * `instruction` - What to change, e.g. "more casual".
    /// * `context` - Who the message is for; used in the prompt only.
    pub async fn refine(
        &self,
        original: &str,
        instruction: &str,
        context: &str,
    ) -> Result<String, AppError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            AppError::ExternalApiError("ANTHROPIC_API_KEY is not configured".to_string())
        })?;

        let url = format!("{}/v1/messages", self.base_url);
        let body = json!({
            "model": self.model,
            "max_tokens": REFINE_MAX_TOKENS,
            "system": REFINE_SYSTEM_PROMPT,
            "messages": [{
                "role": "user",
                "content": format!(
                    "Recipient: {}\nInstruction: {}\n\nOriginal message:\n{}",
                    context, instruction, original
                ),
            }],
        });

        tracing::debug!("Refining reply with model {}", self.model);

        let response = self
            .client
            .post(&url)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("Anthropic request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::ExternalApiError(format!(
                "Anthropic returned {}: {}",
                status, error_text
            )));
        }

        let parsed: MessagesResponse = response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse Anthropic response: {}", e))
        })?;

        let text = parsed
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("")
            .trim()
            .to_string();

        if text.is_empty() {
            return Err(AppError::ExternalApiError(
                "Anthropic returned no text content".to_string(),
            ));
        }
        Ok(text)
    }

    /// Like [`refine`](Self::refine), but any failure keeps the original text.
    pub async fn refine_or_original(
        &self,
        original: &str,
        instruction: &str,
        context: &str,
    ) -> RefinedReply {
        match self.refine(original, instruction, context).await {
            Ok(adjusted) => RefinedReply {
                adjusted,
                refined: true,
            },
            Err(e) => {
                tracing::warn!("Reply refinement failed, keeping original: {}", e);
                RefinedReply {
                    adjusted: original.to_string(),
                    refined: false,
                }
            }
        }
    }
}

/// One bookable start time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableSlot {
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduling_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AvailableTimesResponse {
    #[serde(default)]
    collection: Vec<AvailableTime>,
}

#[derive(Debug, Deserialize)]
struct AvailableTime {
    #[serde(default)]
    status: Option<String>,
    start_time: DateTime<Utc>,
    #[serde(default)]
    scheduling_url: Option<String>,
}

/// Read-only availability lookup against Calendly.
#[derive(Clone)]
pub struct SchedulingClient {
    client: Client,
    base_url: String,
    token: Option<String>,
    event_type: Option<String>,
    retry: RetryPolicy,
}

impl SchedulingClient {
    pub fn new(config: &Config) -> Result<Self, AppError> {
        Ok(Self {
            client: http_client()?,
            base_url: config.calendly_base_url.clone(),
            token: config.calendly_token.clone(),
            event_type: config.calendly_event_type.clone(),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.token.is_some() && self.event_type.is_some()
    }

    /// Open slots in the next `days` days (Calendly caps the window at 7).
    pub async fn available_slots(&self, days: i64) -> Result<Vec<AvailableSlot>, AppError> {
        let (token, event_type) = match (self.token.as_deref(), self.event_type.as_deref()) {
            (Some(token), Some(event_type)) => (token, event_type),
            _ => {
                return Err(AppError::ExternalApiError(
                    "Calendly is not configured".to_string(),
                ))
            }
        };

        // Calendly rejects windows that start in the past.
        let start = Utc::now() + ChronoDuration::minutes(5);
        let end = start + ChronoDuration::days(days.clamp(1, 7));

        let url = reqwest::Url::parse_with_params(
            &format!("{}/event_type_available_times", self.base_url),
            &[
                ("event_type", event_type),
                ("start_time", start.to_rfc3339().as_str()),
                ("end_time", end.to_rfc3339().as_str()),
            ],
        )
        .map_err(|e| AppError::ExternalApiError(format!("Failed to build URL: {}", e)))?;

        let response: AvailableTimesResponse =
            retry_with_backoff("Calendly availability", self.retry, || {
                self.fetch_once(url.clone(), token)
            })
            .await?;

        let slots: Vec<AvailableSlot> = response
            .collection
            .into_iter()
            .filter(|t| t.status.as_deref().map_or(true, |s| s == "available"))
            .map(|t| AvailableSlot {
                start_time: t.start_time,
                scheduling_url: t.scheduling_url,
            })
            .collect();

        tracing::info!("Calendly returned {} open slots", slots.len());
        Ok(slots)
    }

    async fn fetch_once(
        &self,
        url: reqwest::Url,
        token: &str,
    ) -> Result<AvailableTimesResponse, AppError> {
        let response = self
            .client
            .get(url)
            .header("Authorization", format!("Bearer {}", token))
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("Calendly request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::ExternalApiError(format!(
                "Calendly returned {}: {}",
                status, error_text
            )));
        }

        response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse Calendly response: {}", e))
        })
    }
}

/// Short human-readable list of the first `limit` slots, e.g.
/// "Tue Mar 4 3:00 PM or Wed Mar 5 10:30 AM (UTC)".
pub fn format_slots(slots: &[AvailableSlot], limit: usize) -> Option<String> {
    let labels: Vec<String> = slots
        .iter()
        .take(limit)
        .map(|slot| slot.start_time.format("%a %b %-d %-I:%M %p").to_string())
        .collect();

    match labels.len() {
        0 => None,
        1 => Some(format!("{} (UTC)", labels[0])),
        n => Some(format!(
            "{} or {} (UTC)",
            labels[..n - 1].join(", "),
            labels[n - 1]
        )),
    }
}
