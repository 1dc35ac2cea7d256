use crate::budget::Budget;
use crate::bus::ProgressBus;
use crate::error::ResearchError;
use crate::evidence_store::EvidenceStore;
use crate::evaluator::Evaluator;
use crate::planner::{Planner, SubTask};
use crate::researcher::{Researcher, ResearcherConfig};
use crate::writer::Writer;
use chrono::Utc;
use minerva_contract::{
    EvaluationResult, LogLevel, ProgressEvent, ProgressKind, QualityMetrics, Report,
    ResearchSummary, ResearchTask, SearchProvider, TaskStatus, TaskStatusUpdate, TaskStore,
    TextProvider,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Knobs shared by every orchestration this instance runs.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Wall-clock deadline per task in seconds.
    pub deadline_secs: u64,
    /// Refinement queries taken per gap-analysis pass at most.
    pub max_refinements: usize,
    pub researcher: ResearcherConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            deadline_secs: 300,
            max_refinements: 4,
            researcher: ResearcherConfig::default(),
        }
    }
}

/// Drives one research task through plan → research → evaluate →
/// refine/write, owning its lifecycle records and progress events.
///
/// One orchestrator instance is shared by all tasks; each `run` call is a
/// single-task state machine executing on its own worker. Stages within a
/// task run strictly sequentially; only the researcher fans out internally.
pub struct ResearchOrchestrator {
    text: Arc<dyn TextProvider>,
    search: Arc<dyn SearchProvider>,
    store: Arc<dyn TaskStore>,
    bus: Arc<ProgressBus>,
    config: OrchestratorConfig,
    /// Set by the persistence layer once it has degraded to the in-memory
    /// fallback; completed tasks are then marked `completed-degraded`.
    persistence_degraded: Arc<AtomicBool>,
}

impl ResearchOrchestrator {
    pub fn new(
        text: Arc<dyn TextProvider>,
        search: Arc<dyn SearchProvider>,
        store: Arc<dyn TaskStore>,
        bus: Arc<ProgressBus>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            text,
            search,
            store,
            bus,
            config,
            persistence_degraded: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share the persistence-degradation signal with this orchestrator.
    #[must_use]
    pub fn with_persistence_degraded_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.persistence_degraded = flag;
        self
    }

    /// Run one task to its terminal state. Never panics across this
    /// boundary and never lets an error escape: every failure ends in one
    /// `failed` event plus a task-status update.
    pub async fn run(&self, task: ResearchTask, cancel: CancellationToken) {
        let started = Instant::now();
        let deadline = Duration::from_secs(self.config.deadline_secs);

        let outcome = tokio::select! {
            result = self.run_inner(&task, &cancel, started) => result,
            _ = tokio::time::sleep(deadline) => {
                // Stop in-flight provider calls; their results are discarded.
                cancel.cancel();
                Err(ResearchError::DeadlineExceeded)
            }
        };

        if let Err(error) = outcome {
            self.finalize_failure(&task, &error).await;
        }
    }

    async fn run_inner(
        &self,
        task: &ResearchTask,
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<(), ResearchError> {
        let task_id = task.id.as_str();
        let query = task.scoped_query();
        let config = &task.config;
        let k_max = config.max_iterations.max(1);

        self.emit(
            task_id,
            ProgressKind::Started,
            format!("Research started: {}", task.query),
            Some(json!({
                "kind": task.kind,
                "max_iterations": k_max,
                "min_completion_score": config.min_completion_score,
                "budget": config.budget,
            })),
        )
        .await;
        self.update_status(
            task_id,
            TaskStatus::Running,
            TaskStatusUpdate {
                started_at: Some(Utc::now()),
                ..Default::default()
            },
        )
        .await;

        if cancel.is_cancelled() {
            return Err(ResearchError::Cancelled);
        }

        // Planning
        let planner = Planner::new(self.text.clone());
        let plan = planner.plan(&query, cancel).await?;
        self.emit(
            task_id,
            ProgressKind::Planning,
            format!("Plan created with {} sub-tasks", plan.len()),
            Some(json!({ "subtask_count": plan.len() })),
        )
        .await;

        let evidence = EvidenceStore::new(&query);
        let budget = Budget::new(config.budget);
        let researcher = Researcher::new(
            self.search.clone(),
            self.text.clone(),
            self.config.researcher.clone(),
        );
        let evaluator = Evaluator::new(self.text.clone());

        let mut queries: Vec<SubTask> = plan;
        let mut final_eval: Option<EvaluationResult> = None;
        let mut iteration_details: Vec<Value> = Vec::new();
        let mut gaps_identified: Vec<String> = Vec::new();
        let mut iterations_completed = 0u32;

        for k in 1..=k_max {
            if cancel.is_cancelled() {
                return Err(ResearchError::Cancelled);
            }
            // An exhausted budget goes straight to writing; with budget 0
            // this skips research entirely.
            if budget.is_exhausted() {
                break;
            }

            self.emit(
                task_id,
                ProgressKind::Iteration,
                format!("Iteration {k} of {k_max}"),
                Some(json!({ "iteration": k, "max_iterations": k_max })),
            )
            .await;

            let outcome = researcher
                .run_iteration(&queries, &budget, &evidence, cancel)
                .await;
            if cancel.is_cancelled() {
                return Err(ResearchError::Cancelled);
            }
            iterations_completed = k;

            self.emit(
                task_id,
                ProgressKind::Evidence,
                format!(
                    "Collected {} new evidence items ({} total)",
                    outcome.added,
                    evidence.len()
                ),
                Some(json!({
                    "new": outcome.added,
                    "total": evidence.len(),
                    "duplicates_dropped": outcome.duplicates,
                    "failed_subqueries": outcome.failed_queries,
                })),
            )
            .await;

            if budget.is_exhausted() {
                iteration_details.push(json!({
                    "iteration": k,
                    "queries": queries.len(),
                    "evidence_added": outcome.added,
                    "score": Value::Null,
                    "gaps_found": 0,
                }));
                info!(task_id, iteration = k, "budget exhausted; writing report");
                break;
            }

            let snapshot = evidence.snapshot();
            let eval = evaluator.evaluate(&query, &snapshot, cancel).await?;
            self.emit(
                task_id,
                ProgressKind::Evaluation,
                format!(
                    "Completion score {:.2} ({})",
                    eval.overall_score, eval.level
                ),
                Some(json!({
                    "score": eval.overall_score,
                    "level": eval.level,
                    "dimensions": eval.dimensions,
                })),
            )
            .await;
            iteration_details.push(json!({
                "iteration": k,
                "queries": queries.len(),
                "evidence_added": outcome.added,
                "score": eval.overall_score,
                "gaps_found": eval.gaps.len(),
            }));

            let converged = eval.overall_score >= config.min_completion_score;
            let last_iteration = k == k_max;
            if converged || last_iteration || outcome.is_unproductive() {
                final_eval = Some(eval);
                break;
            }

            // Gap analysis and refinement for the next iteration.
            let gap_names: Vec<String> = eval.gaps.iter().map(|g| g.name.clone()).collect();
            for name in &gap_names {
                if !gaps_identified.contains(name) {
                    gaps_identified.push(name.clone());
                }
            }
            self.emit(
                task_id,
                ProgressKind::GapAnalysis,
                format!("{} information gaps identified", eval.gaps.len()),
                Some(json!({ "gaps": gap_names })),
            )
            .await;

            let refinements: Vec<String> = eval
                .refinements
                .iter()
                .take(self.config.max_refinements)
                .cloned()
                .collect();
            if refinements.is_empty() {
                final_eval = Some(eval);
                break;
            }
            self.emit(
                task_id,
                ProgressKind::Refinement,
                format!("{} refinement queries for next iteration", refinements.len()),
                Some(json!({ "count": refinements.len() })),
            )
            .await;

            // Refinements replace the previous iteration's queries.
            queries = refinements
                .into_iter()
                .enumerate()
                .map(|(i, q)| SubTask {
                    id: format!("R{k}-{}", i + 1),
                    query: q,
                    priority: 1.0 - 0.1 * i as f64,
                    iteration: k + 1,
                })
                .collect();
            final_eval = Some(eval);
        }

        // Writing
        if cancel.is_cancelled() {
            return Err(ResearchError::Cancelled);
        }
        let snapshot = evidence.snapshot();
        self.emit(
            task_id,
            ProgressKind::ReportGeneration,
            format!("Generating report from {} evidence items", snapshot.len()),
            Some(json!({ "evidence_total": snapshot.len() })),
        )
        .await;

        let writer = Writer::new(self.text.clone());
        let draft = writer.write(&query, &snapshot, cancel).await?;
        for key in &draft.stripped_citations {
            self.append_log(
                task_id,
                LogLevel::Warning,
                &format!("stripped unresolved citation [{key}] from report"),
                None,
            )
            .await;
        }

        let score = final_eval.as_ref().map_or(0.0, |e| e.overall_score);
        let duration = started.elapsed().as_secs_f64();
        let mut key_findings: Vec<(f64, String)> = snapshot
            .iter()
            .map(|e| (e.quality, e.source.title.clone()))
            .collect();
        key_findings.sort_by(|a, b| b.0.total_cmp(&a.0));

        let report = Report {
            task_id: task_id.to_string(),
            report_md: draft.report_md,
            sources_bib: draft.sources_bib,
            research_summary: Some(ResearchSummary {
                iterations_completed,
                gaps_identified,
                key_findings: key_findings.into_iter().take(3).map(|(_, t)| t).collect(),
                iteration_details,
            }),
            quality_metrics: Some(QualityMetrics {
                completion_score: score,
                evidence_count: snapshot.len(),
                execution_time_seconds: duration,
            }),
            created_at: Utc::now(),
        };
        if let Err(e) = self.store.create_report(&report).await {
            warn!(task_id, error = %e, "failed to persist report");
        }

        let degraded = self.persistence_degraded.load(Ordering::SeqCst);
        self.emit(
            task_id,
            ProgressKind::Completed,
            format!(
                "Research completed: score {:.2}, {} evidence items",
                score,
                snapshot.len()
            ),
            Some(json!({
                "score": score,
                "evidence_count": snapshot.len(),
                "duration_seconds": duration,
                "iterations": iterations_completed,
            })),
        )
        .await;
        self.update_status(
            task_id,
            TaskStatus::Completed,
            TaskStatusUpdate {
                details: degraded.then(|| "completed-degraded".to_string()),
                completed_at: Some(Utc::now()),
                evidence_count: Some(snapshot.len()),
                sources_summary: Some(evidence.sources_summary()),
                ..Default::default()
            },
        )
        .await;
        info!(task_id, score, evidence = snapshot.len(), "research task completed");
        Ok(())
    }

    async fn finalize_failure(&self, task: &ResearchTask, error: &ResearchError) {
        let reason = error.reason();
        warn!(task_id = %task.id, %reason, "research task failed");
        self.emit(
            &task.id,
            ProgressKind::Failed,
            format!("Research failed: {reason}"),
            Some(json!({ "reason": reason })),
        )
        .await;
        self.update_status(
            &task.id,
            TaskStatus::Failed,
            TaskStatusUpdate {
                details: Some(reason),
                completed_at: Some(Utc::now()),
                ..Default::default()
            },
        )
        .await;
    }

    /// Publish one progress event, then mirror it into the task's trace
    /// log. Always called after the side-effect it describes has begun.
    async fn emit(&self, task_id: &str, kind: ProgressKind, message: String, data: Option<Value>) {
        let event = ProgressEvent::new(task_id, kind, message, data);
        self.bus.publish(event.clone());
        let level = if kind == ProgressKind::Failed {
            LogLevel::Error
        } else {
            LogLevel::Info
        };
        let payload = serde_json::to_value(&event).ok();
        self.append_log(task_id, level, &event.message, payload).await;
    }

    async fn append_log(&self, task_id: &str, level: LogLevel, message: &str, data: Option<Value>) {
        if let Err(e) = self.store.append_log(task_id, level, message, data).await {
            warn!(task_id, error = %e, "failed to append task log");
        }
    }

    /// Best-effort status write; the task keeps progressing if persistence
    /// misbehaves mid-run.
    async fn update_status(&self, task_id: &str, status: TaskStatus, extras: TaskStatusUpdate) {
        if let Err(e) = self.store.update_task_status(task_id, status, extras).await {
            warn!(task_id, error = %e, "failed to update task status");
        }
    }
}
