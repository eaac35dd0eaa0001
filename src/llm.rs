//! Generative language model provider abstraction.
//!
//! Defines the [`LanguageModel`] trait and the concrete [`GeminiClient`]
//! implementation calling the Google generative-language REST API.
//!
//! Provider failures are classified ONCE, at this boundary, into the typed
//! [`LlmError`] variants. Callers match on variants; nothing downstream
//! inspects error message text.
//!
//! # Retry Strategy
//!
//! Exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! Exhausted retries resolve to [`LlmError::QuotaExceeded`] when the last
//! failure was a 429, [`LlmError::Transient`] otherwise.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::config::LlmConfig;

/// Typed provider failure, decided at the adapter boundary.
#[derive(Debug, Error)]
pub enum LlmError {
    /// The provider rejected the request for quota/rate reasons and
    /// retries are exhausted. Callers should signal "try later".
    #[error("generation quota exceeded")]
    QuotaExceeded,
    /// The provider refused to generate for safety/policy reasons.
    #[error("request blocked by safety policy: {0}")]
    SafetyBlocked(String),
    /// The provider answered, but the body was not the expected shape.
    #[error("malformed provider response: {0}")]
    MalformedResponse(String),
    /// Network failure or server error that outlived the retry budget.
    #[error("transient provider failure: {0}")]
    Transient(String),
    /// Anything else (bad request, auth failure, unexpected status).
    #[error("provider failure: {0}")]
    Unknown(String),
}

/// Trait for generative text providers.
///
/// Injected into the classifier, synthesizer, and article generator so
/// tests can substitute fakes without touching process-wide state.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, LlmError>;
}

// ============ Gemini Provider ============

/// Language model provider using the Google generative-language API.
///
/// Calls `POST /v1beta/models/{model}:generateContent`. Requires the
/// `GEMINI_API_KEY` environment variable to be set at construction.
pub struct GeminiClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    max_retries: u32,
}

impl GeminiClient {
    pub fn new(config: &LlmConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| anyhow::anyhow!("GEMINI_API_KEY environment variable not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            max_retries: config.max_retries,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent",
            self.model
        )
    }
}

#[async_trait]
impl LanguageModel for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(self.endpoint())
                .query(&[("key", self.api_key.as_str())])
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response
                            .json()
                            .await
                            .map_err(|e| LlmError::MalformedResponse(e.to_string()))?;
                        return extract_generated_text(&json);
                    }

                    // Rate limited or server error — retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(if status.as_u16() == 429 {
                            LlmError::QuotaExceeded
                        } else {
                            LlmError::Transient(format!("HTTP {}: {}", status, body_text))
                        });
                        continue;
                    }

                    // Client error (not 429) — don't retry
                    let body_text = response.text().await.unwrap_or_default();
                    return Err(LlmError::Unknown(format!(
                        "HTTP {}: {}",
                        status, body_text
                    )));
                }
                Err(e) => {
                    last_err = Some(LlmError::Transient(e.to_string()));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| LlmError::Transient("generation failed after retries".to_string())))
    }
}

/// Extract the generated text from a generateContent response body.
///
/// A 200 response can still be a refusal: `promptFeedback.blockReason`
/// or a candidate `finishReason` of `SAFETY` both map to
/// [`LlmError::SafetyBlocked`].
fn extract_generated_text(json: &serde_json::Value) -> Result<String, LlmError> {
    if let Some(reason) = json
        .pointer("/promptFeedback/blockReason")
        .and_then(|v| v.as_str())
    {
        return Err(LlmError::SafetyBlocked(reason.to_string()));
    }

    let candidate = json
        .pointer("/candidates/0")
        .ok_or_else(|| LlmError::MalformedResponse("missing candidates array".to_string()))?;

    if let Some(reason) = candidate.get("finishReason").and_then(|v| v.as_str()) {
        if reason == "SAFETY" {
            return Err(LlmError::SafetyBlocked(reason.to_string()));
        }
    }

    let text = candidate
        .pointer("/content/parts/0/text")
        .and_then(|v| v.as_str())
        .ok_or_else(|| LlmError::MalformedResponse("missing candidate text".to_string()))?;

    if text.trim().is_empty() {
        return Err(LlmError::MalformedResponse("empty candidate text".to_string()));
    }

    Ok(text.to_string())
}
