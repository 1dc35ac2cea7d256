use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Structured summary of the research process, attached to deep reports.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResearchSummary {
    pub iterations_completed: u32,
    pub gaps_identified: Vec<String>,
    pub key_findings: Vec<String>,
    /// One entry per iteration: queries executed, evidence collected,
    /// completion score, gaps found.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub iteration_details: Vec<Value>,
}

/// Quality metrics of a finished research run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub completion_score: f64,
    pub evidence_count: usize,
    pub execution_time_seconds: f64,
}

/// The final report for a completed task. One-to-one with completed tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub task_id: String,
    pub report_md: String,
    /// Bibliography block generated from the evidence snapshot.
    pub sources_bib: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub research_summary: Option<ResearchSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_metrics: Option<QualityMetrics>,
    pub created_at: DateTime<Utc>,
}

/// Log severity for task-scoped records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        };
        f.write_str(s)
    }
}

/// Append-only task log record; also the persisted form of trace events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub task_id: String,
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// Structured payload carried alongside the message (trace events
    /// store the full progress event here).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}
