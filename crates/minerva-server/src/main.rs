use clap::Parser;
use minerva_server::config::Args;
use minerva_server::http::{self, AppState};
use minerva_server::worker::TaskRunner;
use minerva_research_loop::{ProgressBus, ResearchOrchestrator};
use std::sync::{Arc, Mutex};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let providers = match minerva_gateway::build_providers(args.gateway_config()) {
        Ok(providers) => providers,
        Err(e) => {
            eprintln!("failed to construct provider gateway: {e}");
            std::process::exit(2);
        }
    };

    let resolved = minerva_store_adapters::connect(
        args.persistence_url.as_deref(),
        &args.persistence_db_name,
    )
    .await;

    let bus = Arc::new(ProgressBus::new());
    let orchestrator = Arc::new(
        ResearchOrchestrator::new(
            providers.text.clone(),
            providers.search.clone(),
            resolved.store.clone(),
            bus.clone(),
            args.orchestrator_config(),
        )
        .with_persistence_degraded_flag(resolved.degraded.clone()),
    );
    let runner = Arc::new(TaskRunner::new(orchestrator, args.task_cap()));

    let app = http::router(AppState {
        store: resolved.store,
        bus,
        runner,
        providers: providers.status,
        backend: resolved.backend,
        persistence_degraded: resolved.degraded,
        quality_threshold: args.quality_threshold,
        health_cache: Arc::new(Mutex::new(None)),
    });

    let listener = match tokio::net::TcpListener::bind(&args.http_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("failed to bind {}: {e}", args.http_addr);
            std::process::exit(2);
        }
    };
    info!(addr = %args.http_addr, "minerva server listening");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
    {
        eprintln!("http server crashed: {e}");
        std::process::exit(1);
    }
}
