//! Task store adapter implementations for the Minerva research engine.

pub mod fallback_store;
pub mod memory_store;
#[cfg(feature = "postgres")]
pub mod postgres_store;

pub use fallback_store::FallbackTaskStore;
pub use memory_store::MemoryTaskStore;
#[cfg(feature = "postgres")]
pub use postgres_store::PostgresTaskStore;

use minerva_contract::TaskStore;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
#[cfg(feature = "postgres")]
use tracing::{info, warn};

/// Which backend a [`connect`] call resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Durable,
    Memory,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Durable => "durable",
            BackendKind::Memory => "memory",
        }
    }
}

/// Task store resolved at startup, with the live degradation signal.
pub struct ResolvedStore {
    pub store: Arc<dyn TaskStore>,
    pub backend: BackendKind,
    /// Raised if the durable backend dies mid-process (see
    /// [`FallbackTaskStore`]); always false for memory-only deployments.
    pub degraded: Arc<AtomicBool>,
}

impl ResolvedStore {
    fn memory() -> Self {
        Self {
            store: Arc::new(MemoryTaskStore::new()),
            backend: BackendKind::Memory,
            degraded: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// Resolve the task store at startup.
///
/// With a persistence URL, connect to Postgres, ensure the schema, and wrap
/// the durable store so a mid-process outage degrades instead of failing
/// tasks. If the backend is unreachable at startup the process still
/// starts, on the in-memory store, with a warning. Without a URL the
/// in-memory store is selected directly.
#[cfg(feature = "postgres")]
pub async fn connect(url: Option<&str>, db_name: &str) -> ResolvedStore {
    let Some(url) = url else {
        info!("no persistence url configured; using in-memory task store");
        return ResolvedStore::memory();
    };

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(url)
        .await;

    match pool {
        Ok(pool) => {
            let store = PostgresTaskStore::new(pool, db_name);
            match store.ensure_tables().await {
                Ok(()) => {
                    info!(db_name, "durable task store ready");
                    let wrapped = FallbackTaskStore::new(Arc::new(store));
                    let degraded = wrapped.degraded_flag();
                    ResolvedStore {
                        store: Arc::new(wrapped),
                        backend: BackendKind::Durable,
                        degraded,
                    }
                }
                Err(e) => {
                    warn!(error = %e, "schema setup failed; falling back to in-memory task store");
                    ResolvedStore::memory()
                }
            }
        }
        Err(e) => {
            warn!(error = %e, "persistence backend unreachable; falling back to in-memory task store");
            ResolvedStore::memory()
        }
    }
}
