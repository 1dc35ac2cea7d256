use crate::worker::TaskRunner;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use minerva_contract::{
    ResearchConfig, ResearchTask, TaskKind, TaskStore, TaskStoreError,
};
use minerva_gateway::ProviderStatus;
use minerva_research_loop::ProgressBus;
use minerva_store_adapters::BackendKind;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::time::Instant;

/// `/health` responses are cached this long.
const HEALTH_CACHE_TTL_SECS: u64 = 30;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn TaskStore>,
    pub bus: Arc<ProgressBus>,
    pub runner: Arc<TaskRunner>,
    pub providers: ProviderStatus,
    pub backend: BackendKind,
    pub persistence_degraded: Arc<AtomicBool>,
    /// Default minimum completion score for deep requests.
    pub quality_threshold: f64,
    pub health_cache: Arc<Mutex<Option<(Instant, Value)>>>,
}

impl AppState {
    fn persistence_label(&self) -> &'static str {
        if self.persistence_degraded.load(Ordering::SeqCst) {
            BackendKind::Memory.as_str()
        } else {
            self.backend.as_str()
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (code, msg) = match &self {
            ApiError::TaskNotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, self.to_string()),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
        };
        let body = Json(json!({ "error": msg }));
        (code, body).into_response()
    }
}

impl From<TaskStoreError> for ApiError {
    fn from(e: TaskStoreError) -> Self {
        match e {
            TaskStoreError::NotFound(id) => ApiError::TaskNotFound(id),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/research", post(start_research))
        .route("/deep-research", post(start_deep_research))
        .route("/tasks/:id", delete(cancel_task))
        .route("/tasks/:id/status", get(task_status))
        .route("/reports/:id", get(get_report))
        .route("/deep-research/:id", get(get_deep_report))
        .route("/traces/:id", get(get_traces))
        .route("/ws/progress/:id", get(crate::ws::progress_upgrade))
        .with_state(state)
}

async fn health(State(st): State<AppState>) -> Json<Value> {
    {
        let cache = st.health_cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((at, body)) = cache.as_ref() {
            if at.elapsed().as_secs() < HEALTH_CACHE_TTL_SECS {
                return Json(body.clone());
            }
        }
    }

    let body = json!({
        "status": "healthy",
        "providers": {
            "text": if st.providers.text_live { "live" } else { "mock" },
            "search": if st.providers.search_live { "live" } else { "mock" },
        },
        "persistence": st.persistence_label(),
        "active_tasks": st.runner.active_count(),
    });
    let mut cache = st.health_cache.lock().unwrap_or_else(PoisonError::into_inner);
    *cache = Some((Instant::now(), body.clone()));
    Json(body)
}

#[derive(Debug, Deserialize)]
struct ResearchRequest {
    query: String,
    #[serde(default)]
    scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeepResearchRequest {
    query: String,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    max_iterations: Option<u32>,
    #[serde(default)]
    min_completion_score: Option<f64>,
    #[serde(default)]
    budget: Option<u32>,
}

async fn accept_task(
    st: &AppState,
    task: ResearchTask,
    details: String,
) -> Result<Response, ApiError> {
    st.store
        .create_task(&task)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    st.runner.spawn(task.clone());
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "task_id": task.id,
            "status": "accepted",
            "details": details,
        })),
    )
        .into_response())
}

async fn start_research(
    State(st): State<AppState>,
    Json(request): Json<ResearchRequest>,
) -> Result<Response, ApiError> {
    if request.query.trim().is_empty() {
        return Err(ApiError::BadRequest("query must not be empty".into()));
    }
    let config = ResearchConfig {
        scope: request.scope,
        ..ResearchConfig::simple()
    };
    let task = ResearchTask::accepted(request.query.trim(), TaskKind::Simple, config);
    accept_task(
        &st,
        task,
        "Research task accepted and running in the background.".to_string(),
    )
    .await
}

async fn start_deep_research(
    State(st): State<AppState>,
    Json(request): Json<DeepResearchRequest>,
) -> Result<Response, ApiError> {
    if request.query.trim().is_empty() {
        return Err(ApiError::BadRequest("query must not be empty".into()));
    }
    let max_iterations = request.max_iterations.unwrap_or(3);
    if !(1..=5).contains(&max_iterations) {
        return Err(ApiError::BadRequest(format!(
            "max_iterations must be in 1..=5, got {max_iterations}"
        )));
    }
    let min_completion_score = request.min_completion_score.unwrap_or(st.quality_threshold);
    if !(0.5..=1.0).contains(&min_completion_score) {
        return Err(ApiError::BadRequest(format!(
            "min_completion_score must be in 0.5..=1.0, got {min_completion_score}"
        )));
    }
    let budget = request.budget.unwrap_or(100);
    if !(50..=300).contains(&budget) {
        return Err(ApiError::BadRequest(format!(
            "budget must be in 50..=300, got {budget}"
        )));
    }

    let config = ResearchConfig {
        max_iterations,
        min_completion_score,
        budget,
        scope: request.scope,
    };
    let task = ResearchTask::accepted(request.query.trim(), TaskKind::Deep, config);
    let details = format!(
        "Deep research task accepted: {max_iterations} iterations, \
         min score {min_completion_score}, budget {budget}."
    );
    accept_task(&st, task, details).await
}

/// `DELETE /tasks/:id` — cancel a running (or still-queued) task. The
/// worker observes the signal, abandons in-flight provider calls, and
/// fails the task with reason `cancelled`.
async fn cancel_task(
    State(st): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let task = st
        .store
        .get_task(&id)
        .await?
        .ok_or_else(|| ApiError::TaskNotFound(id.clone()))?;

    if task.status.is_terminal() || !st.runner.cancel(&id) {
        return Err(ApiError::Conflict(format!(
            "task {id} is not running ({})",
            task.status
        )));
    }
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "task_id": id, "status": "cancelling" })),
    )
        .into_response())
}

async fn task_status(
    State(st): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ResearchTask>, ApiError> {
    let task = st
        .store
        .get_task(&id)
        .await?
        .ok_or(ApiError::TaskNotFound(id))?;
    Ok(Json(task))
}

async fn get_report(
    State(st): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let task = st
        .store
        .get_task(&id)
        .await?
        .ok_or_else(|| ApiError::TaskNotFound(id.clone()))?;

    let body = match task.status {
        minerva_contract::TaskStatus::Completed => {
            let report = st
                .store
                .get_report(&id)
                .await?
                .ok_or_else(|| ApiError::Internal(format!("report missing for task {id}")))?;
            let metrics_json = report
                .quality_metrics
                .as_ref()
                .and_then(|m| serde_json::to_string(m).ok());
            json!({
                "status": "completed",
                "report_md": report.report_md,
                "sources_bib": report.sources_bib,
                "metrics_json": metrics_json,
            })
        }
        // A failed task is reported, not hidden behind a 404.
        minerva_contract::TaskStatus::Failed => json!({
            "status": "failed",
            "error_reason": task.details,
        }),
        other => json!({ "status": other }),
    };
    Ok(Json(body))
}

async fn get_deep_report(
    State(st): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let task = st
        .store
        .get_task(&id)
        .await?
        .ok_or_else(|| ApiError::TaskNotFound(id.clone()))?;

    let body = match task.status {
        minerva_contract::TaskStatus::Completed => {
            let report = st
                .store
                .get_report(&id)
                .await?
                .ok_or_else(|| ApiError::Internal(format!("report missing for task {id}")))?;
            json!({
                "status": "completed",
                "report_md": report.report_md,
                "sources_bib": report.sources_bib,
                "research_summary": report.research_summary,
                "quality_metrics": report.quality_metrics,
            })
        }
        minerva_contract::TaskStatus::Failed => json!({
            "status": "failed",
            "error_reason": task.details,
        }),
        other => json!({ "status": other }),
    };
    Ok(Json(body))
}

/// Ordered event log of a task as NDJSON.
async fn get_traces(
    State(st): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    st.store
        .get_task(&id)
        .await?
        .ok_or_else(|| ApiError::TaskNotFound(id.clone()))?;

    let logs = st.store.list_logs(&id, None).await?;
    let mut body = String::new();
    for record in logs {
        let line = match record.data {
            Some(event) => event,
            None => json!({
                "task_id": record.task_id,
                "timestamp": record.timestamp,
                "event_type": "log",
                "message": record.message,
                "level": record.level,
            }),
        };
        body.push_str(&line.to_string());
        body.push('\n');
    }

    Ok((
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        body,
    )
        .into_response())
}
