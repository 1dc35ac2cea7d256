use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The closed set of progress event kinds a task can publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    Started,
    Planning,
    Iteration,
    Evidence,
    Evaluation,
    GapAnalysis,
    Refinement,
    ReportGeneration,
    Completed,
    Failed,
}

impl ProgressKind {
    /// `completed` and `failed` close the task's progress channel.
    pub fn is_terminal(self) -> bool {
        matches!(self, ProgressKind::Completed | ProgressKind::Failed)
    }
}

/// One ordered, immutable progress event for a task.
///
/// Serialized to JSON only at the WebSocket / NDJSON boundary; inside the
/// process it stays typed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub task_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "event_type")]
    pub kind: ProgressKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ProgressEvent {
    pub fn new(
        task_id: impl Into<String>,
        kind: ProgressKind,
        message: impl Into<String>,
        data: Option<Value>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            timestamp: Utc::now(),
            kind,
            message: message.into(),
            data,
        }
    }
}
