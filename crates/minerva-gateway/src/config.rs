use minerva_contract::ModelRole;

/// Retry strategy for provider calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Max attempts per call (must be >= 1).
    pub max_attempts: usize,
    /// Initial backoff for retries in milliseconds.
    pub initial_backoff_ms: u64,
    /// Max backoff cap in milliseconds.
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 250,
            max_backoff_ms: 4_000,
        }
    }
}

/// Role → provider model mapping.
#[derive(Debug, Clone)]
pub struct RoleModels {
    pub planner: String,
    pub researcher: String,
    pub evaluator: String,
    pub writer: String,
}

impl RoleModels {
    pub fn model_for(&self, role: ModelRole) -> &str {
        match role {
            ModelRole::Planner => &self.planner,
            ModelRole::Researcher => &self.researcher,
            ModelRole::Evaluator => &self.evaluator,
            ModelRole::Writer => &self.writer,
        }
    }
}

impl Default for RoleModels {
    fn default() -> Self {
        Self {
            planner: "gpt-4o-mini".to_string(),
            researcher: "gpt-4o-mini".to_string(),
            evaluator: "gpt-4o".to_string(),
            writer: "gpt-4o".to_string(),
        }
    }
}

/// Gateway configuration, built once at startup from the environment and
/// threaded through; absent credentials select mock mode per capability.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Credential for the text-completion provider. `None` → mock mode.
    pub text_api_key: Option<String>,
    /// Credential for the web-search provider. `None` → mock mode.
    pub search_api_key: Option<String>,
    /// Override endpoint for the text provider (OpenAI-compatible base URL).
    pub text_base_url: Option<String>,
    /// Search provider endpoint.
    pub search_base_url: String,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub retry: RetryPolicy,
    /// Structured-output repair attempts after the first parse failure.
    pub max_repairs: usize,
    pub models: RoleModels,
    /// Sustained request rate per capability.
    pub rate_limit_per_minute: u32,
    /// Instantaneous burst allowance.
    pub rate_limit_burst: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            text_api_key: None,
            search_api_key: None,
            text_base_url: None,
            search_base_url: "https://api.tavily.com".to_string(),
            connect_timeout_secs: 30,
            read_timeout_secs: 120,
            retry: RetryPolicy::default(),
            max_repairs: 2,
            models: RoleModels::default(),
            rate_limit_per_minute: 100,
            rate_limit_burst: 20,
        }
    }
}
