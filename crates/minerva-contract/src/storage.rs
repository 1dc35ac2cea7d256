use crate::report::{LogLevel, LogRecord, Report};
use crate::task::{ResearchTask, TaskStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

/// Storage errors. Both backends surface the same kinds; uniqueness
/// violations map onto [`TaskStoreError::AlreadyExists`] everywhere.
#[derive(Debug, Error)]
pub enum TaskStoreError {
    #[error("task not found: {0}")]
    NotFound(String),

    #[error("record already exists")]
    AlreadyExists,

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Filtered, paginated task listing.
#[derive(Debug, Clone)]
pub struct TaskListQuery {
    pub status: Option<TaskStatus>,
    /// Number of items to skip (0-based), newest first.
    pub offset: usize,
    /// Maximum number of items to return (clamped to 1..=200).
    pub limit: usize,
}

impl Default for TaskListQuery {
    fn default() -> Self {
        Self {
            status: None,
            offset: 0,
            limit: 50,
        }
    }
}

/// Paginated task list, ordered by `created_at` descending.
#[derive(Debug, Clone)]
pub struct TaskListPage {
    pub items: Vec<ResearchTask>,
    pub total: usize,
    pub has_more: bool,
}

/// Optional fields carried alongside a status transition.
#[derive(Debug, Clone, Default)]
pub struct TaskStatusUpdate {
    pub details: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub evidence_count: Option<usize>,
    pub sources_summary: Option<String>,
}

impl TaskStatusUpdate {
    /// Apply this transition to a task record in place. Both backends use
    /// this so their merge semantics cannot drift apart.
    pub fn apply(self, task: &mut ResearchTask, status: TaskStatus) {
        task.status = status;
        task.updated_at = Utc::now();
        if let Some(details) = self.details {
            task.details = Some(details);
        }
        if let Some(started_at) = self.started_at {
            task.started_at = Some(started_at);
        }
        if let Some(completed_at) = self.completed_at {
            task.completed_at = Some(completed_at);
        }
        if let Some(evidence_count) = self.evidence_count {
            task.evidence_count = Some(evidence_count);
        }
        if let Some(sources_summary) = self.sources_summary {
            task.sources_summary = Some(sources_summary);
        }
    }
}

/// Read operations over persisted research tasks.
#[async_trait]
pub trait TaskReader: Send + Sync {
    async fn get_task(&self, id: &str) -> Result<Option<ResearchTask>, TaskStoreError>;

    async fn list_tasks(&self, query: &TaskListQuery) -> Result<TaskListPage, TaskStoreError>;

    async fn get_report(&self, task_id: &str) -> Result<Option<Report>, TaskStoreError>;

    /// Logs for a task in timestamp order, optionally bounded below.
    async fn list_logs(
        &self,
        task_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<LogRecord>, TaskStoreError>;
}

/// Write operations over persisted research tasks.
#[async_trait]
pub trait TaskWriter: TaskReader {
    /// Insert a new task. Returns `AlreadyExists` if the id is taken;
    /// existing state is left unchanged.
    async fn create_task(&self, task: &ResearchTask) -> Result<(), TaskStoreError>;

    /// Transition a task's status and merge the optional extras.
    /// Idempotent for same-state writes.
    async fn update_task_status(
        &self,
        id: &str,
        status: TaskStatus,
        extras: TaskStatusUpdate,
    ) -> Result<(), TaskStoreError>;

    /// Persist the final report. Unique per task.
    async fn create_report(&self, report: &Report) -> Result<(), TaskStoreError>;

    /// Append one log record. Append-only; never fails on duplicates.
    async fn append_log(
        &self,
        task_id: &str,
        level: LogLevel,
        message: &str,
        data: Option<Value>,
    ) -> Result<(), TaskStoreError>;
}

/// Full task store capability (read + write).
pub trait TaskStore: TaskWriter {}

impl<T: TaskWriter + ?Sized> TaskStore for T {}
