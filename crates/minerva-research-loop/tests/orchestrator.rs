use async_trait::async_trait;
use minerva_contract::{
    CompletionRequest, ModelRole, ProgressEvent, ProgressKind, ProviderError, ResearchConfig,
    ResearchTask, SearchHit, SearchProvider, SearchRequest, TaskKind, TaskReader, TaskStatus,
    TaskWriter, TextProvider,
};
use minerva_research_loop::{OrchestratorConfig, ProgressBus, ResearchOrchestrator};
use minerva_store_adapters::MemoryTaskStore;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Text provider with a scripted evaluation score; planner and writer
/// replies are deterministic and well-formed.
struct StubText {
    eval_score: f64,
    with_refinements: bool,
    fail_planning: bool,
}

impl StubText {
    fn scoring(eval_score: f64) -> Self {
        Self {
            eval_score,
            with_refinements: true,
            fail_planning: false,
        }
    }
}

#[async_trait]
impl TextProvider for StubText {
    async fn complete(&self, request: CompletionRequest) -> Result<String, ProviderError> {
        match request.role {
            ModelRole::Writer => Ok(
                "# Report\n\n## Executive Summary\n\nFindings [S1].\n\n## Conclusions\n\nDone."
                    .to_string(),
            ),
            _ => Ok("summary text".to_string()),
        }
    }

    async fn complete_json(
        &self,
        request: CompletionRequest,
    ) -> Result<serde_json::Value, ProviderError> {
        match request.role {
            ModelRole::Planner => {
                if self.fail_planning {
                    return Err(ProviderError::Transport("planner unreachable".into()));
                }
                Ok(json!([
                    {"id": "T01", "query": "aspect one", "priority": 0.9},
                    {"id": "T02", "query": "aspect two", "priority": 0.6},
                    {"id": "T03", "query": "aspect three", "priority": 0.4},
                ]))
            }
            ModelRole::Evaluator => {
                let refinements = if self.with_refinements {
                    json!(["deeper aspect one", "deeper aspect two"])
                } else {
                    json!([])
                };
                Ok(json!({
                    "overall_score": self.eval_score,
                    "dimensions": {
                        "factual": self.eval_score, "source_diversity": self.eval_score,
                        "temporal": self.eval_score, "perspective": self.eval_score,
                        "depth": self.eval_score
                    },
                    "gaps": [{"name": "depth", "description": "d", "priority": 3,
                              "suggested_query": "deeper aspect one"}],
                    "refinements": refinements,
                }))
            }
            _ => Err(ProviderError::Shape("unexpected role".into())),
        }
    }
}

/// Search provider returning `hits_per_query` distinct hits, optionally
/// stalling so cancellation can interrupt mid-iteration.
struct StubSearch {
    hits_per_query: usize,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl StubSearch {
    fn with_hits(hits_per_query: usize) -> Self {
        Self {
            hits_per_query,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SearchProvider for StubSearch {
    async fn search(&self, request: SearchRequest) -> Result<Vec<SearchHit>, ProviderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok((0..self.hits_per_query)
            .map(|i| SearchHit {
                url: format!("https://example.org/{call}/{i}"),
                title: format!("{} #{i}", request.query),
                excerpt: format!("distinct evidence for {} (hit {i}, call {call})", request.query),
                published: None,
                relevance: Some(0.8),
            })
            .collect())
    }
}

struct Harness {
    store: Arc<MemoryTaskStore>,
    bus: Arc<ProgressBus>,
    orchestrator: ResearchOrchestrator,
}

fn harness(text: StubText, search: StubSearch, config: OrchestratorConfig) -> Harness {
    let store = Arc::new(MemoryTaskStore::new());
    let bus = Arc::new(ProgressBus::new());
    let orchestrator = ResearchOrchestrator::new(
        Arc::new(text),
        Arc::new(search),
        store.clone(),
        bus.clone(),
        config,
    );
    Harness {
        store,
        bus,
        orchestrator,
    }
}

fn deep_task(max_iterations: u32, min_score: f64, budget: u32) -> ResearchTask {
    ResearchTask::accepted(
        "impact of open banking",
        TaskKind::Deep,
        ResearchConfig {
            max_iterations,
            min_completion_score: min_score,
            budget,
            scope: None,
        },
    )
}

async fn run_to_terminal(h: &Harness, task: ResearchTask) -> (ResearchTask, Vec<ProgressEvent>) {
    let mut rx = h.bus.subscribe(&task.id).unwrap();
    h.store.create_task(&task).await.unwrap();
    h.orchestrator.run(task.clone(), CancellationToken::new()).await;

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    let record = h.store.get_task(&task.id).await.unwrap().unwrap();
    (record, events)
}

fn kinds(events: &[ProgressEvent]) -> Vec<ProgressKind> {
    events.iter().map(|e| e.kind).collect()
}

fn count_kind(events: &[ProgressEvent], kind: ProgressKind) -> usize {
    events.iter().filter(|e| e.kind == kind).count()
}

#[tokio::test]
async fn deep_task_converges_on_first_iteration() {
    let h = harness(
        StubText::scoring(0.9),
        StubSearch::with_hits(2),
        OrchestratorConfig::default(),
    );
    let (record, events) = run_to_terminal(&h, deep_task(3, 0.5, 100)).await;

    assert_eq!(record.status, TaskStatus::Completed);
    assert_eq!(count_kind(&events, ProgressKind::Iteration), 1);
    assert_eq!(
        kinds(&events),
        vec![
            ProgressKind::Started,
            ProgressKind::Planning,
            ProgressKind::Iteration,
            ProgressKind::Evidence,
            ProgressKind::Evaluation,
            ProgressKind::ReportGeneration,
            ProgressKind::Completed,
        ]
    );

    let report = h.store.get_report(&record.id).await.unwrap().unwrap();
    assert!(report.report_md.contains("# Report"));
    assert!(report.sources_bib.contains("[S1]"));
    let metrics = report.quality_metrics.unwrap();
    assert_eq!(metrics.completion_score, 0.9);
    assert_eq!(record.evidence_count, Some(metrics.evidence_count));
}

#[tokio::test]
async fn deep_task_exhausts_max_iterations_below_threshold() {
    let h = harness(
        StubText::scoring(0.4),
        StubSearch::with_hits(2),
        OrchestratorConfig::default(),
    );
    let (record, events) = run_to_terminal(&h, deep_task(3, 0.99, 200)).await;

    assert_eq!(record.status, TaskStatus::Completed);
    assert_eq!(count_kind(&events, ProgressKind::Iteration), 3);
    assert_eq!(count_kind(&events, ProgressKind::Evaluation), 3);
    assert_eq!(count_kind(&events, ProgressKind::GapAnalysis), 2);
    assert_eq!(count_kind(&events, ProgressKind::Refinement), 2);
    assert_eq!(count_kind(&events, ProgressKind::Completed), 1);

    let report = h.store.get_report(&record.id).await.unwrap().unwrap();
    let summary = report.research_summary.unwrap();
    assert_eq!(summary.iterations_completed, 3);
    assert!(report.quality_metrics.unwrap().completion_score < 0.99);
}

#[tokio::test]
async fn zero_budget_goes_straight_to_writing() {
    let search = StubSearch::with_hits(2);
    let h = harness(
        StubText::scoring(0.9),
        search,
        OrchestratorConfig::default(),
    );
    let (record, events) = run_to_terminal(&h, deep_task(3, 0.5, 0)).await;

    assert_eq!(record.status, TaskStatus::Completed);
    assert_eq!(count_kind(&events, ProgressKind::Iteration), 0);
    assert_eq!(count_kind(&events, ProgressKind::Evaluation), 0);
    assert_eq!(record.evidence_count, Some(0));
    assert!(h.store.get_report(&record.id).await.unwrap().is_some());
}

#[tokio::test]
async fn unproductive_iteration_short_circuits_to_writing() {
    let h = harness(
        StubText::scoring(0.1),
        StubSearch::with_hits(0),
        OrchestratorConfig::default(),
    );
    let (record, events) = run_to_terminal(&h, deep_task(3, 0.95, 100)).await;

    assert_eq!(record.status, TaskStatus::Completed);
    assert_eq!(count_kind(&events, ProgressKind::Iteration), 1);
    assert_eq!(record.evidence_count, Some(0));
}

#[tokio::test]
async fn cancellation_fails_task_without_report() {
    let mut search = StubSearch::with_hits(2);
    search.delay = Some(Duration::from_secs(30));
    let h = harness(
        StubText::scoring(0.9),
        search,
        OrchestratorConfig::default(),
    );
    let task = deep_task(3, 0.5, 100);
    let mut rx = h.bus.subscribe(&task.id).unwrap();
    h.store.create_task(&task).await.unwrap();

    let cancel = CancellationToken::new();
    let cancel_handle = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel_handle.cancel();
    });
    h.orchestrator.run(task.clone(), cancel).await;

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    let terminal = events.last().unwrap();
    assert_eq!(terminal.kind, ProgressKind::Failed);
    assert_eq!(terminal.data.as_ref().unwrap()["reason"], "cancelled");
    assert_eq!(count_kind(&events, ProgressKind::Failed), 1);

    let record = h.store.get_task(&task.id).await.unwrap().unwrap();
    assert_eq!(record.status, TaskStatus::Failed);
    assert_eq!(record.details.as_deref(), Some("cancelled"));
    assert!(h.store.get_report(&task.id).await.unwrap().is_none());
}

#[tokio::test]
async fn deadline_expiry_fails_task_with_reason() {
    let mut search = StubSearch::with_hits(2);
    search.delay = Some(Duration::from_secs(30));
    let h = harness(
        StubText::scoring(0.9),
        search,
        OrchestratorConfig {
            deadline_secs: 0,
            ..Default::default()
        },
    );
    let (record, events) = run_to_terminal(&h, deep_task(3, 0.5, 100)).await;

    assert_eq!(record.status, TaskStatus::Failed);
    assert_eq!(record.details.as_deref(), Some("deadline-exceeded"));
    assert_eq!(events.last().unwrap().kind, ProgressKind::Failed);
}

#[tokio::test]
async fn planner_transport_failure_fails_task() {
    let text = StubText {
        eval_score: 0.9,
        with_refinements: true,
        fail_planning: true,
    };
    let h = harness(text, StubSearch::with_hits(2), OrchestratorConfig::default());
    let (record, events) = run_to_terminal(&h, deep_task(2, 0.5, 100)).await;

    assert_eq!(record.status, TaskStatus::Failed);
    assert_eq!(events.last().unwrap().kind, ProgressKind::Failed);
    assert!(h.store.get_report(&record.id).await.unwrap().is_none());
}

#[tokio::test]
async fn simple_config_equals_single_iteration_deep_run() {
    let h = harness(
        StubText::scoring(0.2),
        StubSearch::with_hits(2),
        OrchestratorConfig::default(),
    );
    let task = ResearchTask::accepted(
        "python async best practices",
        TaskKind::Simple,
        ResearchConfig::simple(),
    );
    let (record, events) = run_to_terminal(&h, task).await;

    assert_eq!(record.status, TaskStatus::Completed);
    // One iteration, no refinement machinery, report present.
    assert_eq!(count_kind(&events, ProgressKind::Iteration), 1);
    assert_eq!(count_kind(&events, ProgressKind::GapAnalysis), 0);
    assert!(h.store.get_report(&record.id).await.unwrap().is_some());
}

#[tokio::test]
async fn trace_log_replays_terminal_state() {
    let h = harness(
        StubText::scoring(0.9),
        StubSearch::with_hits(2),
        OrchestratorConfig::default(),
    );
    let (record, events) = run_to_terminal(&h, deep_task(3, 0.5, 100)).await;

    // Every published event is mirrored into the task's logs in order.
    let logs = h.store.list_logs(&record.id, None).await.unwrap();
    let logged_events: Vec<ProgressEvent> = logs
        .iter()
        .filter_map(|l| l.data.clone())
        .filter_map(|d| serde_json::from_value(d).ok())
        .collect();
    assert_eq!(kinds(&logged_events), kinds(&events));

    // Replaying the log reconstructs the terminal state fields.
    let terminal = logged_events.last().unwrap();
    let data = terminal.data.as_ref().unwrap();
    assert_eq!(terminal.kind, ProgressKind::Completed);
    assert_eq!(
        data["evidence_count"].as_u64().unwrap() as usize,
        record.evidence_count.unwrap()
    );
    assert_eq!(
        data["score"].as_f64().unwrap(),
        h.store
            .get_report(&record.id)
            .await
            .unwrap()
            .unwrap()
            .quality_metrics
            .unwrap()
            .completion_score
    );
}

#[tokio::test]
async fn degraded_persistence_marks_completed_degraded() {
    use std::sync::atomic::AtomicBool;

    let store = Arc::new(MemoryTaskStore::new());
    let bus = Arc::new(ProgressBus::new());
    let degraded = Arc::new(AtomicBool::new(false));
    let orchestrator = ResearchOrchestrator::new(
        Arc::new(StubText::scoring(0.9)),
        Arc::new(StubSearch::with_hits(2)),
        store.clone(),
        bus.clone(),
        OrchestratorConfig::default(),
    )
    .with_persistence_degraded_flag(degraded.clone());

    let task = deep_task(2, 0.5, 100);
    store.create_task(&task).await.unwrap();
    // The durable backend dies while the task is in flight.
    degraded.store(true, Ordering::SeqCst);
    orchestrator.run(task.clone(), CancellationToken::new()).await;

    let record = store.get_task(&task.id).await.unwrap().unwrap();
    assert_eq!(record.status, TaskStatus::Completed);
    assert_eq!(record.details.as_deref(), Some("completed-degraded"));
    assert!(store.get_report(&task.id).await.unwrap().is_some());
}

#[tokio::test]
async fn late_observer_sees_suffix_in_publication_order() {
    let h = harness(
        StubText::scoring(0.4),
        StubSearch::with_hits(2),
        OrchestratorConfig::default(),
    );
    let task = deep_task(2, 0.99, 100);
    let mut early = h.bus.subscribe(&task.id).unwrap();
    h.store.create_task(&task).await.unwrap();

    let bus = h.bus.clone();
    let task_id = task.id.clone();
    let late_events = tokio::spawn(async move {
        // Attach after the run is underway; anything received must be a
        // suffix of the full sequence.
        tokio::time::sleep(Duration::from_millis(10)).await;
        let mut events = Vec::new();
        if let Ok(mut rx) = bus.subscribe(&task_id) {
            while let Some(event) = rx.recv().await {
                events.push(event);
            }
        }
        events
    });

    h.orchestrator.run(task.clone(), CancellationToken::new()).await;

    let mut full = Vec::new();
    while let Some(event) = early.recv().await {
        full.push(event);
    }
    let late = late_events.await.unwrap();

    let full_kinds = kinds(&full);
    let late_kinds = kinds(&late);
    assert!(full_kinds.ends_with(&late_kinds));
    assert_eq!(full.last().unwrap().kind, ProgressKind::Completed);
}
