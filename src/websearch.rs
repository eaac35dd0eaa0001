//! Web search provider abstraction.
//!
//! Defines the [`SearchProvider`] trait and the concrete [`TavilyClient`]
//! implementation. Results are returned in provider order (assumed
//! relevance-descending); no re-ranking happens here.
//!
//! Unlike the classifier, retrieval fails CLOSED: provider failures wrap
//! into [`SearchError`] and propagate to the caller. An empty result list
//! is a valid non-error outcome and is surfaced as such.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::config::SearchConfig;
use crate::models::SourceDocument;

/// Retrieval failure with its underlying cause.
#[derive(Debug, Error)]
#[error("source retrieval failed: {cause}")]
pub struct SearchError {
    cause: String,
}

impl SearchError {
    pub fn new(cause: impl Into<String>) -> Self {
        Self {
            cause: cause.into(),
        }
    }
}

/// Fully-resolved options for one retrieval call. Every field is
/// independently overridable per request; unset fields come from config.
///
/// Serialization order is stable, so the serialized form doubles as the
/// cache-key input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOptions {
    pub max_results: usize,
    pub search_depth: String,
    pub include_domains: Vec<String>,
    pub exclude_domains: Vec<String>,
}

impl SearchOptions {
    pub fn from_config(config: &SearchConfig) -> Self {
        Self {
            max_results: config.max_results,
            search_depth: config.search_depth.clone(),
            include_domains: config.include_domains.clone(),
            exclude_domains: config.exclude_domains.clone(),
        }
    }
}

/// Trait for search providers. Injected into the retriever so tests can
/// substitute fakes and count outbound calls.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SourceDocument>, SearchError>;
}

// ============ Tavily Provider ============

/// Search provider using the Tavily REST API.
///
/// Calls `POST https://api.tavily.com/search`. Requires the
/// `TAVILY_API_KEY` environment variable to be set at construction.
pub struct TavilyClient {
    client: reqwest::Client,
    api_key: String,
    max_retries: u32,
}

impl TavilyClient {
    pub fn new(config: &SearchConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var("TAVILY_API_KEY")
            .map_err(|_| anyhow::anyhow!("TAVILY_API_KEY environment variable not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl SearchProvider for TavilyClient {
    async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SourceDocument>, SearchError> {
        let body = serde_json::json!({
            "api_key": self.api_key,
            "query": query,
            "search_depth": options.search_depth,
            "max_results": options.max_results,
            "include_domains": options.include_domains,
            "exclude_domains": options.exclude_domains,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post("https://api.tavily.com/search")
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
                            .map_err(|e| SearchError::new(e.to_string()))?;
                        return parse_search_response(&json);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(SearchError::new(format!(
                            "HTTP {}: {}",
                            status, body_text
                        )));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    return Err(SearchError::new(format!("HTTP {}: {}", status, body_text)));
                }
                Err(e) => {
                    last_err = Some(SearchError::new(e.to_string()));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| SearchError::new("retries exhausted")))
    }
}

/// Parse a Tavily search response into canonical [`SourceDocument`]s,
/// preserving provider order.
fn parse_search_response(json: &serde_json::Value) -> Result<Vec<SourceDocument>, SearchError> {
    let results = json
        .get("results")
        .and_then(|r| r.as_array())
        .ok_or_else(|| SearchError::new("missing results array in provider response"))?;

    let mut sources = Vec::with_capacity(results.len());

    for item in results {
        let url = item
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| SearchError::new("result missing url"))?;

        sources.push(SourceDocument {
            title: item
                .get("title")
                .and_then(|v| v.as_str())
                .unwrap_or("(untitled)")
                .to_string(),
            url: url.to_string(),
            excerpt: item
                .get("content")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            score: item.get("score").and_then(|v| v.as_f64()).unwrap_or(0.0),
            published_at: item
                .get("published_date")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
        });
    }

    Ok(sources)
}
