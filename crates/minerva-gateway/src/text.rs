use crate::config::GatewayConfig;
use crate::limiter::RateLimiter;
use crate::retry::{backoff_ms, is_retryable_error};
use async_trait::async_trait;
use genai::chat::{ChatMessage, ChatOptions, ChatRequest};
use minerva_contract::{CompletionRequest, ProviderError, TextProvider};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Text-completion capability backed by a `genai` client.
///
/// Centralizes timeouts, retry/backoff, rate limiting, and structured-output
/// repair so upstream stages can treat completion as a total function.
pub struct GenaiTextProvider {
    client: genai::Client,
    config: GatewayConfig,
    limiter: Arc<RateLimiter>,
}

impl GenaiTextProvider {
    pub fn new(config: GatewayConfig, limiter: Arc<RateLimiter>) -> Self {
        let client = build_client(&config);
        Self {
            client,
            config,
            limiter,
        }
    }

    fn chat_options(&self, request: &CompletionRequest) -> ChatOptions {
        let mut options = ChatOptions::default();
        if let Some(temperature) = request.temperature {
            options = options.with_temperature(temperature);
        }
        if let Some(max_tokens) = request.max_tokens {
            options = options.with_max_tokens(max_tokens);
        }
        options
    }

    async fn exec_with_retry(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        if request.prompt.trim().is_empty() {
            return Err(ProviderError::InvalidInput("empty prompt".to_string()));
        }
        let model = self.config.models.model_for(request.role).to_string();
        let read_timeout = Duration::from_secs(self.config.read_timeout_secs);
        self.limiter.acquire(read_timeout).await?;

        let chat_req = ChatRequest::new(vec![ChatMessage::user(request.prompt.clone())]);
        let options = self.chat_options(request);
        let max_attempts = self.config.retry.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            let call = self
                .client
                .exec_chat(&model, chat_req.clone(), Some(&options));
            let outcome = tokio::time::timeout(read_timeout, call).await;

            let message = match outcome {
                Ok(Ok(response)) => {
                    let text = response
                        .content_text_as_str()
                        .map(|s| s.to_string())
                        .unwrap_or_default();
                    return Ok(text);
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!("read timed out after {}s", self.config.read_timeout_secs),
            };

            last_error = format!("model='{model}' attempt={attempt}/{max_attempts}: {message}");
            if attempt < max_attempts && is_retryable_error(&message) {
                let wait = backoff_ms(&self.config.retry, attempt);
                debug!(role = %request.role, attempt, wait_ms = wait, "retrying completion");
                tokio::time::sleep(Duration::from_millis(wait)).await;
                continue;
            }
            break;
        }

        Err(ProviderError::Transport(last_error))
    }
}

#[async_trait]
impl TextProvider for GenaiTextProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<String, ProviderError> {
        self.exec_with_retry(&request).await
    }

    async fn complete_json(&self, request: CompletionRequest) -> Result<Value, ProviderError> {
        let original_prompt = request.prompt.clone();
        let mut attempt_request = request;
        let mut last_error = String::new();

        for repair in 0..=self.config.max_repairs {
            let text = self.exec_with_retry(&attempt_request).await?;
            match extract_json_value(&text) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!(role = %attempt_request.role, repair, error = %e, "unparseable structured output");
                    last_error = e;
                    attempt_request.prompt = format!(
                        "{original_prompt}\n\nYour previous reply could not be parsed \
                         ({last_error}). Reply again with ONLY the corrected JSON value, \
                         no prose and no code fences."
                    );
                }
            }
        }

        Err(ProviderError::Shape(last_error))
    }
}

fn build_client(config: &GatewayConfig) -> genai::Client {
    let api_key = config.text_api_key.clone().unwrap_or_default();
    let base_url = config.text_base_url.clone();
    genai::Client::builder()
        .with_service_target_resolver_fn(move |mut target: genai::ServiceTarget| {
            if let Some(url) = &base_url {
                target.endpoint = genai::resolver::Endpoint::from_owned(url.clone());
            }
            if !api_key.is_empty() {
                target.auth = genai::resolver::AuthData::from_single(api_key.clone());
            }
            Ok(target)
        })
        .build()
}

/// Pull the outermost JSON value out of a model reply.
///
/// Accepts a bare JSON document, or one wrapped in prose / code fences, by
/// slicing from the first opening bracket to the last matching closer.
pub(crate) fn extract_json_value(text: &str) -> Result<Value, String> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }
    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (trimmed.find(open), trimmed.rfind(close)) {
            if end > start {
                if let Ok(value) = serde_json::from_str::<Value>(&trimmed[start..=end]) {
                    return Ok(value);
                }
            }
        }
    }
    Err("no JSON value found in response".to_string())
}
