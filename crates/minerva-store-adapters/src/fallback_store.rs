use crate::memory_store::MemoryTaskStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use minerva_contract::{
    LogLevel, LogRecord, Report, ResearchTask, TaskListPage, TaskListQuery, TaskReader,
    TaskStatus, TaskStatusUpdate, TaskStore, TaskStoreError, TaskWriter,
};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Durable store with an in-memory shadow that takes over when the durable
/// backend becomes unreachable mid-process.
///
/// Every write is mirrored into the shadow first, so the swap loses nothing
/// that was written through this process. The swap is one-way for the
/// process lifetime; the `degraded` flag it raises is shared with the
/// orchestrator (tasks finishing afterwards are marked `completed-degraded`)
/// and with `/health`.
pub struct FallbackTaskStore {
    primary: Arc<dyn TaskStore>,
    shadow: MemoryTaskStore,
    degraded: Arc<AtomicBool>,
}

impl FallbackTaskStore {
    pub fn new(primary: Arc<dyn TaskStore>) -> Self {
        Self {
            primary,
            shadow: MemoryTaskStore::new(),
            degraded: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shared flag raised at the moment of degradation.
    pub fn degraded_flag(&self) -> Arc<AtomicBool> {
        self.degraded.clone()
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    fn note_primary_failure(&self, op: &str, error: &TaskStoreError) {
        if !self.degraded.swap(true, Ordering::SeqCst) {
            warn!(op, %error, "durable task store unreachable; degrading to in-memory shadow");
        }
    }

    /// Run a write against the shadow, then the primary unless degraded.
    /// A primary `Unavailable` degrades the process but the write, already
    /// in the shadow, still succeeds.
    async fn write_through<F, Fut>(
        &self,
        op: &str,
        shadow_result: Result<(), TaskStoreError>,
        primary_call: F,
    ) -> Result<(), TaskStoreError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<(), TaskStoreError>>,
    {
        // Shadow is authoritative for uniqueness: it has seen every write.
        shadow_result?;
        if self.is_degraded() {
            return Ok(());
        }
        match primary_call().await {
            Ok(()) => Ok(()),
            Err(TaskStoreError::Unavailable(e)) => {
                self.note_primary_failure(op, &TaskStoreError::Unavailable(e));
                Ok(())
            }
            // Anything else (NotFound, AlreadyExists) would contradict the
            // shadow, which already accepted the write; prefer the shadow.
            Err(other) => {
                warn!(op, error = %other, "durable store disagreed with shadow; keeping shadow result");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl TaskReader for FallbackTaskStore {
    async fn get_task(&self, id: &str) -> Result<Option<ResearchTask>, TaskStoreError> {
        if !self.is_degraded() {
            match self.primary.get_task(id).await {
                Ok(task) => return Ok(task),
                Err(TaskStoreError::Unavailable(e)) => {
                    self.note_primary_failure("get_task", &TaskStoreError::Unavailable(e));
                }
                Err(other) => return Err(other),
            }
        }
        self.shadow.get_task(id).await
    }

    async fn list_tasks(&self, query: &TaskListQuery) -> Result<TaskListPage, TaskStoreError> {
        if !self.is_degraded() {
            match self.primary.list_tasks(query).await {
                Ok(page) => return Ok(page),
                Err(TaskStoreError::Unavailable(e)) => {
                    self.note_primary_failure("list_tasks", &TaskStoreError::Unavailable(e));
                }
                Err(other) => return Err(other),
            }
        }
        self.shadow.list_tasks(query).await
    }

    async fn get_report(&self, task_id: &str) -> Result<Option<Report>, TaskStoreError> {
        if !self.is_degraded() {
            match self.primary.get_report(task_id).await {
                Ok(report) => return Ok(report),
                Err(TaskStoreError::Unavailable(e)) => {
                    self.note_primary_failure("get_report", &TaskStoreError::Unavailable(e));
                }
                Err(other) => return Err(other),
            }
        }
        self.shadow.get_report(task_id).await
    }

    async fn list_logs(
        &self,
        task_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<LogRecord>, TaskStoreError> {
        if !self.is_degraded() {
            match self.primary.list_logs(task_id, since).await {
                Ok(logs) => return Ok(logs),
                Err(TaskStoreError::Unavailable(e)) => {
                    self.note_primary_failure("list_logs", &TaskStoreError::Unavailable(e));
                }
                Err(other) => return Err(other),
            }
        }
        self.shadow.list_logs(task_id, since).await
    }
}

#[async_trait]
impl TaskWriter for FallbackTaskStore {
    async fn create_task(&self, task: &ResearchTask) -> Result<(), TaskStoreError> {
        let shadow = self.shadow.create_task(task).await;
        self.write_through("create_task", shadow, || self.primary.create_task(task))
            .await
    }

    async fn update_task_status(
        &self,
        id: &str,
        status: TaskStatus,
        extras: TaskStatusUpdate,
    ) -> Result<(), TaskStoreError> {
        let shadow = self
            .shadow
            .update_task_status(id, status, extras.clone())
            .await;
        self.write_through("update_task_status", shadow, || {
            self.primary.update_task_status(id, status, extras)
        })
        .await
    }

    async fn create_report(&self, report: &Report) -> Result<(), TaskStoreError> {
        let shadow = self.shadow.create_report(report).await;
        self.write_through("create_report", shadow, || self.primary.create_report(report))
            .await
    }

    async fn append_log(
        &self,
        task_id: &str,
        level: LogLevel,
        message: &str,
        data: Option<Value>,
    ) -> Result<(), TaskStoreError> {
        let shadow = self
            .shadow
            .append_log(task_id, level, message, data.clone())
            .await;
        self.write_through("append_log", shadow, || {
            self.primary.append_log(task_id, level, message, data)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minerva_contract::{ResearchConfig, TaskKind};

    /// Primary that starts healthy and can be killed mid-test.
    struct FlakyPrimary {
        inner: MemoryTaskStore,
        dead: AtomicBool,
    }

    impl FlakyPrimary {
        fn new() -> Self {
            Self {
                inner: MemoryTaskStore::new(),
                dead: AtomicBool::new(false),
            }
        }

        fn kill(&self) {
            self.dead.store(true, Ordering::SeqCst);
        }

        fn check(&self) -> Result<(), TaskStoreError> {
            if self.dead.load(Ordering::SeqCst) {
                Err(TaskStoreError::Unavailable("connection refused".into()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl TaskReader for FlakyPrimary {
        async fn get_task(&self, id: &str) -> Result<Option<ResearchTask>, TaskStoreError> {
            self.check()?;
            self.inner.get_task(id).await
        }
        async fn list_tasks(&self, query: &TaskListQuery) -> Result<TaskListPage, TaskStoreError> {
            self.check()?;
            self.inner.list_tasks(query).await
        }
        async fn get_report(&self, task_id: &str) -> Result<Option<Report>, TaskStoreError> {
            self.check()?;
            self.inner.get_report(task_id).await
        }
        async fn list_logs(
            &self,
            task_id: &str,
            since: Option<DateTime<Utc>>,
        ) -> Result<Vec<LogRecord>, TaskStoreError> {
            self.check()?;
            self.inner.list_logs(task_id, since).await
        }
    }

    #[async_trait]
    impl TaskWriter for FlakyPrimary {
        async fn create_task(&self, task: &ResearchTask) -> Result<(), TaskStoreError> {
            self.check()?;
            self.inner.create_task(task).await
        }
        async fn update_task_status(
            &self,
            id: &str,
            status: TaskStatus,
            extras: TaskStatusUpdate,
        ) -> Result<(), TaskStoreError> {
            self.check()?;
            self.inner.update_task_status(id, status, extras).await
        }
        async fn create_report(&self, report: &Report) -> Result<(), TaskStoreError> {
            self.check()?;
            self.inner.create_report(report).await
        }
        async fn append_log(
            &self,
            task_id: &str,
            level: LogLevel,
            message: &str,
            data: Option<Value>,
        ) -> Result<(), TaskStoreError> {
            self.check()?;
            self.inner.append_log(task_id, level, message, data).await
        }
    }

    fn task() -> ResearchTask {
        ResearchTask::accepted("q", TaskKind::Simple, ResearchConfig::simple())
    }

    #[tokio::test]
    async fn healthy_primary_serves_reads() {
        let primary = Arc::new(FlakyPrimary::new());
        let store = FallbackTaskStore::new(primary);
        let t = task();
        store.create_task(&t).await.unwrap();
        assert!(store.get_task(&t.id).await.unwrap().is_some());
        assert!(!store.is_degraded());
    }

    #[tokio::test]
    async fn mid_task_primary_death_degrades_without_losing_writes() {
        let primary = Arc::new(FlakyPrimary::new());
        let store = FallbackTaskStore::new(primary.clone());
        let t = task();
        store.create_task(&t).await.unwrap();

        primary.kill();

        // Writes after death succeed against the shadow.
        store
            .update_task_status(&t.id, TaskStatus::Completed, TaskStatusUpdate::default())
            .await
            .unwrap();
        assert!(store.is_degraded());

        // Reads now come from the shadow, which saw every earlier write.
        let loaded = store.get_task(&t.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn uniqueness_errors_still_surface() {
        let primary = Arc::new(FlakyPrimary::new());
        let store = FallbackTaskStore::new(primary);
        let t = task();
        store.create_task(&t).await.unwrap();
        let err = store.create_task(&t).await.unwrap_err();
        assert!(matches!(err, TaskStoreError::AlreadyExists));
    }

    #[tokio::test]
    async fn degraded_flag_is_shared() {
        let primary = Arc::new(FlakyPrimary::new());
        let store = FallbackTaskStore::new(primary.clone());
        let flag = store.degraded_flag();
        assert!(!flag.load(Ordering::SeqCst));

        primary.kill();
        store
            .append_log("t", LogLevel::Info, "m", None)
            .await
            .unwrap();
        assert!(flag.load(Ordering::SeqCst));
    }
}
