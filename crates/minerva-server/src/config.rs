use clap::Parser;
use minerva_gateway::{GatewayConfig, RetryPolicy};
use minerva_research_loop::{OrchestratorConfig, ResearcherConfig};

/// Server configuration, built once at startup from flags and environment
/// and threaded through every component.
#[derive(Debug, Clone, Parser)]
#[command(name = "minerva-server", about = "Iterative deep-research service")]
pub struct Args {
    #[arg(long, env = "MINERVA_HTTP_ADDR", default_value = "127.0.0.1:8080")]
    pub http_addr: String,

    /// Text-provider credential; absent → mock mode.
    #[arg(long, env = "PROVIDER_API_KEY_TEXT", hide_env_values = true)]
    pub provider_api_key_text: Option<String>,

    /// Search-provider credential; absent → mock mode.
    #[arg(long, env = "PROVIDER_API_KEY_SEARCH", hide_env_values = true)]
    pub provider_api_key_search: Option<String>,

    /// Override endpoint for the text provider.
    #[arg(long, env = "PROVIDER_BASE_URL_TEXT")]
    pub provider_base_url_text: Option<String>,

    #[arg(long, env = "PROVIDER_CONNECT_TIMEOUT_SEC", default_value_t = 30)]
    pub provider_connect_timeout_sec: u64,

    #[arg(long, env = "PROVIDER_READ_TIMEOUT_SEC", default_value_t = 120)]
    pub provider_read_timeout_sec: u64,

    #[arg(long, env = "PROVIDER_MAX_RETRIES", default_value_t = 3)]
    pub provider_max_retries: usize,

    /// Durable backend URL; unset → in-memory persistence.
    #[arg(long, env = "PERSISTENCE_URL", hide_env_values = true)]
    pub persistence_url: Option<String>,

    /// Logical database (table-name prefix on the durable backend).
    #[arg(long, env = "PERSISTENCE_DB_NAME", default_value = "minerva")]
    pub persistence_db_name: String,

    /// Global concurrent-task ceiling (clamped to 1..=50).
    #[arg(long, env = "RESEARCH_MAX_CONCURRENT_TASKS", default_value_t = 10)]
    pub max_concurrent_tasks: usize,

    /// Per-task deadline in seconds (clamped to 60..=3600).
    #[arg(long, env = "RESEARCH_DEFAULT_TIMEOUT_SEC", default_value_t = 300)]
    pub default_timeout_sec: u64,

    /// Default minimum completion score for deep requests.
    #[arg(long, env = "RESEARCH_QUALITY_THRESHOLD", default_value_t = 0.75)]
    pub quality_threshold: f64,

    #[arg(long, env = "RESEARCH_MAX_EVIDENCE_PER_SUBTASK", default_value_t = 5)]
    pub max_evidence_per_subtask: usize,

    /// Researcher sub-query concurrency (clamped to 1..=20).
    #[arg(long, env = "RESEARCH_CONCURRENCY", default_value_t = 5)]
    pub research_concurrency: usize,

    /// Re-summarize search excerpts through the researcher model
    /// (costs budget; off = use provider excerpts directly).
    #[arg(long, env = "RESEARCH_SUMMARIZE_EXCERPTS", default_value_t = false)]
    pub summarize_excerpts: bool,

    #[arg(long, env = "RATE_LIMIT_PER_MINUTE", default_value_t = 100)]
    pub rate_limit_per_minute: u32,

    #[arg(long, env = "RATE_LIMIT_BURST", default_value_t = 20)]
    pub rate_limit_burst: u32,
}

impl Args {
    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            text_api_key: self.provider_api_key_text.clone(),
            search_api_key: self.provider_api_key_search.clone(),
            text_base_url: self.provider_base_url_text.clone(),
            connect_timeout_secs: self.provider_connect_timeout_sec,
            read_timeout_secs: self.provider_read_timeout_sec,
            retry: RetryPolicy {
                max_attempts: self.provider_max_retries.max(1),
                ..RetryPolicy::default()
            },
            rate_limit_per_minute: self.rate_limit_per_minute,
            rate_limit_burst: self.rate_limit_burst,
            ..GatewayConfig::default()
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            deadline_secs: self.default_timeout_sec.clamp(60, 3600),
            researcher: ResearcherConfig {
                concurrency: self.research_concurrency.clamp(1, 20),
                max_evidence_per_subtask: self.max_evidence_per_subtask.max(1),
                summarize_excerpts: self.summarize_excerpts,
            },
            ..OrchestratorConfig::default()
        }
    }

    pub fn task_cap(&self) -> usize {
        self.max_concurrent_tasks.clamp(1, 50)
    }
}
