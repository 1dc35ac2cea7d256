use async_trait::async_trait;
use chrono::{DateTime, Utc};
use minerva_contract::{
    LogLevel, LogRecord, Report, ResearchTask, TaskListPage, TaskListQuery, TaskReader,
    TaskStatus, TaskStatusUpdate, TaskStoreError, TaskWriter,
};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
struct Collections {
    tasks: HashMap<String, ResearchTask>,
    reports: HashMap<String, Report>,
    logs: HashMap<String, Vec<LogRecord>>,
}

/// In-memory task store for local development, tests, and the startup
/// fallback when the durable backend is unreachable.
///
/// Process-local and non-durable: all records are lost on restart.
/// Semantics (uniqueness errors, idempotent status writes, log ordering)
/// match the durable backend.
#[derive(Default)]
pub struct MemoryTaskStore {
    collections: RwLock<Collections>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskReader for MemoryTaskStore {
    async fn get_task(&self, id: &str) -> Result<Option<ResearchTask>, TaskStoreError> {
        let collections = self.collections.read().await;
        Ok(collections.tasks.get(id).cloned())
    }

    async fn list_tasks(&self, query: &TaskListQuery) -> Result<TaskListPage, TaskStoreError> {
        let collections = self.collections.read().await;
        let mut items: Vec<ResearchTask> = collections
            .tasks
            .values()
            .filter(|t| query.status.map_or(true, |s| t.status == s))
            .cloned()
            .collect();
        // Newest first, id as a stable tiebreaker.
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));

        let total = items.len();
        let limit = query.limit.clamp(1, 200);
        let offset = query.offset.min(total);
        let end = (offset + limit).min(total);
        let has_more = end < total;
        Ok(TaskListPage {
            items: items[offset..end].to_vec(),
            total,
            has_more,
        })
    }

    async fn get_report(&self, task_id: &str) -> Result<Option<Report>, TaskStoreError> {
        let collections = self.collections.read().await;
        Ok(collections.reports.get(task_id).cloned())
    }

    async fn list_logs(
        &self,
        task_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<LogRecord>, TaskStoreError> {
        let collections = self.collections.read().await;
        let mut logs: Vec<LogRecord> = collections
            .logs
            .get(task_id)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| since.map_or(true, |s| r.timestamp > s))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        logs.sort_by_key(|r| r.timestamp);
        Ok(logs)
    }
}

#[async_trait]
impl TaskWriter for MemoryTaskStore {
    async fn create_task(&self, task: &ResearchTask) -> Result<(), TaskStoreError> {
        let mut collections = self.collections.write().await;
        if collections.tasks.contains_key(&task.id) {
            return Err(TaskStoreError::AlreadyExists);
        }
        collections.tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn update_task_status(
        &self,
        id: &str,
        status: TaskStatus,
        extras: TaskStatusUpdate,
    ) -> Result<(), TaskStoreError> {
        let mut collections = self.collections.write().await;
        let task = collections
            .tasks
            .get_mut(id)
            .ok_or_else(|| TaskStoreError::NotFound(id.to_string()))?;
        extras.apply(task, status);
        Ok(())
    }

    async fn create_report(&self, report: &Report) -> Result<(), TaskStoreError> {
        let mut collections = self.collections.write().await;
        if collections.reports.contains_key(&report.task_id) {
            return Err(TaskStoreError::AlreadyExists);
        }
        collections
            .reports
            .insert(report.task_id.clone(), report.clone());
        Ok(())
    }

    async fn append_log(
        &self,
        task_id: &str,
        level: LogLevel,
        message: &str,
        data: Option<Value>,
    ) -> Result<(), TaskStoreError> {
        let mut collections = self.collections.write().await;
        collections
            .logs
            .entry(task_id.to_string())
            .or_default()
            .push(LogRecord {
                task_id: task_id.to_string(),
                level,
                message: message.to_string(),
                timestamp: Utc::now(),
                data,
            });
        Ok(())
    }
}
