use minerva_contract::ResearchTask;
use minerva_research_loop::ResearchOrchestrator;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Background execution pool: accepted tasks are handed to a detached
/// worker, bounded by the global concurrency ceiling. Submissions beyond
/// the cap queue on the semaphore rather than being rejected.
pub struct TaskRunner {
    orchestrator: Arc<ResearchOrchestrator>,
    permits: Arc<Semaphore>,
    cancellations: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl TaskRunner {
    pub fn new(orchestrator: Arc<ResearchOrchestrator>, max_concurrent: usize) -> Self {
        Self {
            orchestrator,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            cancellations: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Hand an accepted task to a background worker and return immediately.
    pub fn spawn(&self, task: ResearchTask) {
        let orchestrator = self.orchestrator.clone();
        let permits = self.permits.clone();
        let cancellations = self.cancellations.clone();
        let token = CancellationToken::new();
        cancellations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(task.id.clone(), token.clone());

        tokio::spawn(async move {
            // Queue here when the pool is saturated.
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            let task_id = task.id.clone();
            info!(task_id = %task_id, "starting research worker");
            orchestrator.run(task, token).await;
            cancellations
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&task_id);
        });
    }

    /// Cancel a running (or queued) task. Returns whether it was known.
    pub fn cancel(&self, task_id: &str) -> bool {
        let cancellations = self
            .cancellations
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match cancellations.get(task_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Number of workers currently running or queued.
    pub fn active_count(&self) -> usize {
        self.cancellations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
