//! Provider gateway: uniform access to the text-completion and web-search
//! capabilities with timeouts, retries, structured-output repair, rate
//! limiting, and a first-class deterministic mock mode.

mod config;
mod limiter;
mod mock;
mod retry;
mod search;
mod text;

pub use config::{GatewayConfig, RetryPolicy, RoleModels};
pub use limiter::RateLimiter;
pub use mock::{MockSearchProvider, MockTextProvider};
pub use search::HttpSearchProvider;
pub use text::GenaiTextProvider;

use minerva_contract::{ProviderError, SearchProvider, TextProvider};
use std::sync::Arc;
use tracing::info;

/// Which backing each capability resolved to at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderStatus {
    pub text_live: bool,
    pub search_live: bool,
}

/// Built provider handles plus their resolved status (for `/health`).
pub struct Providers {
    pub text: Arc<dyn TextProvider>,
    pub search: Arc<dyn SearchProvider>,
    pub status: ProviderStatus,
}

/// Construct both capabilities from config. A capability with no credential
/// runs in mock mode; this is a deliberate operating mode, not a failure.
pub fn build_providers(config: GatewayConfig) -> Result<Providers, ProviderError> {
    let text_live = config.text_api_key.as_deref().is_some_and(|k| !k.is_empty());
    let search_live = config
        .search_api_key
        .as_deref()
        .is_some_and(|k| !k.is_empty());

    let text: Arc<dyn TextProvider> = if text_live {
        let limiter = Arc::new(RateLimiter::new(
            config.rate_limit_per_minute,
            config.rate_limit_burst,
        ));
        Arc::new(GenaiTextProvider::new(config.clone(), limiter))
    } else {
        info!("no text-provider credential; completions run in mock mode");
        Arc::new(MockTextProvider::new())
    };

    let search: Arc<dyn SearchProvider> = if search_live {
        let limiter = Arc::new(RateLimiter::new(
            config.rate_limit_per_minute,
            config.rate_limit_burst,
        ));
        Arc::new(HttpSearchProvider::new(config, limiter)?)
    } else {
        info!("no search-provider credential; searches run in mock mode");
        Arc::new(MockSearchProvider::new())
    };

    Ok(Providers {
        text,
        search,
        status: ProviderStatus {
            text_live,
            search_live,
        },
    })
}
