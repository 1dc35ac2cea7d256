use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Research mode selected at intake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    /// One planning pass, one research pass, one report.
    Simple,
    /// Iterative research with evaluation and gap refinement.
    Deep,
}

/// Lifecycle status of a research task.
///
/// `Completed` and `Failed` are terminal; the owning orchestrator never
/// transitions a task out of a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Accepted,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Accepted => "accepted",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Per-task configuration snapshot, frozen at intake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchConfig {
    /// Maximum research iterations (simple tasks: always 1; deep: 1..=5).
    pub max_iterations: u32,
    /// Completion score at which research stops early.
    pub min_completion_score: f64,
    /// Provider-call budget: each search costs 1, each completion 2.
    pub budget: u32,
    /// Optional scope hint appended to the query as planning context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl ResearchConfig {
    /// Configuration for a one-shot research task.
    pub fn simple() -> Self {
        Self {
            max_iterations: 1,
            min_completion_score: 0.0,
            budget: 100,
            scope: None,
        }
    }
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            min_completion_score: 0.75,
            budget: 100,
            scope: None,
        }
    }
}

/// A research task record as persisted in the task store.
///
/// Created by the intake layer in `Accepted`; mutated only by the owning
/// orchestrator afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchTask {
    pub id: String,
    pub query: String,
    pub kind: TaskKind,
    pub config: ResearchConfig,
    pub status: TaskStatus,
    /// Free-form status detail: failure reason, degradation marker, etc.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Terminal evidence count, set when the task completes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence_count: Option<usize>,
    /// Terminal one-line summary of consulted sources.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources_summary: Option<String>,
}

impl ResearchTask {
    /// Create a freshly accepted task with a new v4 id.
    pub fn accepted(query: impl Into<String>, kind: TaskKind, config: ResearchConfig) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            query: query.into(),
            kind,
            config,
            status: TaskStatus::Accepted,
            details: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            evidence_count: None,
            sources_summary: None,
        }
    }

    /// The query with the optional scope hint folded in.
    pub fn scoped_query(&self) -> String {
        match self.config.scope.as_deref() {
            Some(scope) if !scope.trim().is_empty() => {
                format!("{} (scope: {})", self.query, scope.trim())
            }
            _ => self.query.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Accepted.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
    }

    #[test]
    fn scoped_query_appends_scope() {
        let mut task = ResearchTask::accepted("rust async", TaskKind::Simple, ResearchConfig::simple());
        assert_eq!(task.scoped_query(), "rust async");
        task.config.scope = Some("embedded targets".into());
        assert_eq!(task.scoped_query(), "rust async (scope: embedded targets)");
    }

    #[test]
    fn accepted_task_round_trips_through_json() {
        let task = ResearchTask::accepted("q", TaskKind::Deep, ResearchConfig::default());
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["status"], "accepted");
        assert_eq!(json["kind"], "deep");
        let back: ResearchTask = serde_json::from_value(json).unwrap();
        assert_eq!(back.id, task.id);
        assert_eq!(back.status, TaskStatus::Accepted);
    }
}
