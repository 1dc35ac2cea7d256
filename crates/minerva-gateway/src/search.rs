use crate::config::GatewayConfig;
use crate::limiter::RateLimiter;
use crate::retry::{backoff_ms, is_retryable_error};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use minerva_contract::{ProviderError, SearchHit, SearchProvider, SearchRequest, SearchTopic};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct WireSearchResponse {
    #[serde(default)]
    results: Vec<WireSearchResult>,
}

#[derive(Debug, Deserialize)]
struct WireSearchResult {
    #[serde(default)]
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    published_date: Option<String>,
}

/// Web-search capability over the provider's REST API.
pub struct HttpSearchProvider {
    http: reqwest::Client,
    config: GatewayConfig,
    limiter: Arc<RateLimiter>,
}

impl HttpSearchProvider {
    pub fn new(config: GatewayConfig, limiter: Arc<RateLimiter>) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.read_timeout_secs))
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            config,
            limiter,
        })
    }

    async fn post_search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>, ProviderError> {
        let url = format!("{}/search", self.config.search_base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "api_key": self.config.search_api_key.as_deref().unwrap_or_default(),
            "query": request.query,
            "max_results": request.max_results,
            "search_depth": "advanced",
            "topic": match request.topic {
                SearchTopic::General => "general",
                SearchTopic::News => "news",
            },
        });

        let max_attempts = self.config.retry.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            let outcome = self.http.post(&url).json(&body).send().await;
            let message = match outcome {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let wire: WireSearchResponse = response
                            .json()
                            .await
                            .map_err(|e| ProviderError::Shape(e.to_string()))?;
                        return Ok(wire.results.into_iter().map(convert_hit).collect());
                    }
                    let body = response.text().await.unwrap_or_default();
                    format!("HTTP {status}: {body}")
                }
                Err(e) => e.to_string(),
            };

            last_error = format!("attempt={attempt}/{max_attempts}: {message}");
            if attempt < max_attempts && is_retryable_error(&message) {
                let wait = backoff_ms(&self.config.retry, attempt);
                debug!(attempt, wait_ms = wait, "retrying search");
                tokio::time::sleep(Duration::from_millis(wait)).await;
                continue;
            }
            break;
        }

        Err(ProviderError::Transport(last_error))
    }
}

#[async_trait]
impl SearchProvider for HttpSearchProvider {
    async fn search(&self, request: SearchRequest) -> Result<Vec<SearchHit>, ProviderError> {
        validate(&request)?;
        self.limiter
            .acquire(Duration::from_secs(self.config.read_timeout_secs))
            .await?;
        self.post_search(&request).await
    }
}

pub(crate) fn validate(request: &SearchRequest) -> Result<(), ProviderError> {
    if request.query.trim().is_empty() {
        return Err(ProviderError::InvalidInput("empty query".to_string()));
    }
    if !(1..=50).contains(&request.max_results) {
        return Err(ProviderError::InvalidInput(format!(
            "max_results must be in 1..=50, got {}",
            request.max_results
        )));
    }
    Ok(())
}

fn convert_hit(wire: WireSearchResult) -> SearchHit {
    SearchHit {
        url: wire.url,
        title: wire.title,
        excerpt: wire.content,
        published: wire.published_date.as_deref().and_then(parse_published),
        relevance: wire.score,
    }
}

/// Providers report publication dates as either RFC-3339 or a bare date.
fn parse_published(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_max_results() {
        assert!(validate(&SearchRequest::new("q", 0)).is_err());
        assert!(validate(&SearchRequest::new("q", 51)).is_err());
        assert!(validate(&SearchRequest::new("q", 50)).is_ok());
        assert!(validate(&SearchRequest::new("  ", 5)).is_err());
    }

    #[test]
    fn parses_both_published_formats() {
        assert!(parse_published("2025-03-14").is_some());
        assert!(parse_published("2025-03-14T09:26:53Z").is_some());
        assert!(parse_published("last tuesday").is_none());
    }
}
