use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Which configured model a completion is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelRole {
    Planner,
    Researcher,
    Evaluator,
    Writer,
}

impl std::fmt::Display for ModelRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ModelRole::Planner => "planner",
            ModelRole::Researcher => "researcher",
            ModelRole::Evaluator => "evaluator",
            ModelRole::Writer => "writer",
        };
        f.write_str(s)
    }
}

/// One text-completion call.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub prompt: String,
    pub role: ModelRole,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
}

impl CompletionRequest {
    pub fn new(role: ModelRole, prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            role,
            max_tokens: None,
            temperature: None,
        }
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Search profile selecting the provider-side result mix.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchTopic {
    #[default]
    General,
    News,
}

/// One web-search call. `max_results` must be in 1..=50.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub max_results: usize,
    pub topic: SearchTopic,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>, max_results: usize) -> Self {
        Self {
            query: query.into(),
            max_results,
            topic: SearchTopic::General,
        }
    }

    #[must_use]
    pub fn with_topic(mut self, topic: SearchTopic) -> Self {
        self.topic = topic;
        self
    }
}

/// A single result from the search provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
    pub excerpt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published: Option<DateTime<Utc>>,
    /// Provider-reported relevance in [0, 1], when available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relevance: Option<f64>,
}

/// Errors surfaced by provider capabilities. Every terminal failure is one
/// of these; nothing ambiguous crosses the gateway boundary.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Malformed call: empty prompt/query, out-of-range max_results.
    #[error("invalid provider input: {0}")]
    InvalidInput(String),

    /// Network failure, timeout, or retryable HTTP status after the retry
    /// budget is exhausted.
    #[error("provider transport failure: {0}")]
    Transport(String),

    /// Structured output that could not be parsed after repair attempts.
    #[error("provider output did not match expected shape: {0}")]
    Shape(String),

    /// The call was abandoned because its task was cancelled.
    #[error("provider call cancelled")]
    Cancelled,
}

/// The complete-text capability.
#[async_trait]
pub trait TextProvider: Send + Sync {
    /// Free-text completion.
    async fn complete(&self, request: CompletionRequest) -> Result<String, ProviderError>;

    /// Structured completion: the response must contain a JSON value,
    /// which the gateway extracts (repairing if needed) and returns.
    /// Callers deserialize into their own shapes and treat failures as
    /// [`ProviderError::Shape`].
    async fn complete_json(&self, request: CompletionRequest) -> Result<Value, ProviderError>;
}

/// The search-web capability.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, request: SearchRequest) -> Result<Vec<SearchHit>, ProviderError>;
}
