use crate::budget::{Budget, COMPLETION_COST, SEARCH_COST};
use crate::cancel::{await_or_cancel, CancelAware};
use crate::evidence_store::{EvidenceCandidate, EvidenceStore};
use crate::planner::SubTask;
use futures::stream::{self, StreamExt};
use minerva_contract::{
    CompletionRequest, ModelRole, SearchProvider, SearchRequest, SearchTopic, TextProvider,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct ResearcherConfig {
    /// Concurrent sub-queries (clamped to 1..=20).
    pub concurrency: usize,
    /// Evidence retained per sub-task at most.
    pub max_evidence_per_subtask: usize,
    /// When set, each hit's excerpt is re-summarized through the
    /// researcher model (costs budget); otherwise the provider excerpt is
    /// used directly.
    pub summarize_excerpts: bool,
}

impl Default for ResearcherConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            max_evidence_per_subtask: 5,
            summarize_excerpts: false,
        }
    }
}

/// What one research iteration produced.
#[derive(Debug, Default, Clone, Copy)]
pub struct IterationOutcome {
    /// Evidence items actually retained (dedup drops excluded).
    pub added: usize,
    /// Candidates dropped as duplicates.
    pub duplicates: usize,
    /// Sub-queries whose search returned at least one hit.
    pub succeeded_queries: usize,
    /// Sub-queries that errored (logged and skipped).
    pub failed_queries: usize,
    /// Sub-queries never issued because the budget was exhausted.
    pub skipped_queries: usize,
}

impl IterationOutcome {
    /// No evidence added and no sub-query succeeded.
    pub fn is_unproductive(&self) -> bool {
        self.added == 0 && self.succeeded_queries == 0
    }
}

#[derive(Debug, Default)]
struct SubTaskStats {
    added: usize,
    duplicates: usize,
    succeeded: bool,
    failed: bool,
    skipped: bool,
}

/// Executes one iteration's sub-queries with bounded concurrency, turning
/// search hits into evidence-store entries.
pub struct Researcher {
    search: Arc<dyn SearchProvider>,
    text: Arc<dyn TextProvider>,
    config: ResearcherConfig,
}

impl Researcher {
    pub fn new(
        search: Arc<dyn SearchProvider>,
        text: Arc<dyn TextProvider>,
        config: ResearcherConfig,
    ) -> Self {
        let config = ResearcherConfig {
            concurrency: config.concurrency.clamp(1, 20),
            ..config
        };
        Self {
            search,
            text,
            config,
        }
    }

    /// Run all sub-queries for one iteration. Individual failures are
    /// logged and skipped; whatever was collected stays collected.
    pub async fn run_iteration(
        &self,
        subtasks: &[SubTask],
        budget: &Budget,
        evidence: &EvidenceStore,
        cancel: &CancellationToken,
    ) -> IterationOutcome {
        let stats: Vec<SubTaskStats> = stream::iter(subtasks.iter().cloned())
            .map(|subtask| self.run_subtask(subtask, budget, evidence, cancel))
            .buffer_unordered(self.config.concurrency)
            .collect()
            .await;

        let mut outcome = IterationOutcome::default();
        for s in stats {
            outcome.added += s.added;
            outcome.duplicates += s.duplicates;
            outcome.succeeded_queries += usize::from(s.succeeded);
            outcome.failed_queries += usize::from(s.failed);
            outcome.skipped_queries += usize::from(s.skipped);
        }
        outcome
    }

    async fn run_subtask(
        &self,
        subtask: SubTask,
        budget: &Budget,
        evidence: &EvidenceStore,
        cancel: &CancellationToken,
    ) -> SubTaskStats {
        let mut stats = SubTaskStats::default();

        // Stop issuing new sub-queries once the budget cannot cover a search.
        if !budget.try_spend(SEARCH_COST) {
            debug!(subtask = %subtask.id, "budget exhausted; skipping sub-query");
            stats.skipped = true;
            return stats;
        }

        // Scale the ask by what the budget can still pay for.
        let max_results = usize::try_from(budget.remaining() / 2 + 1)
            .unwrap_or(1)
            .clamp(1, self.config.max_evidence_per_subtask);
        let topic = topic_for(&subtask);
        let request = SearchRequest::new(subtask.query.clone(), max_results).with_topic(topic);

        let hits = match await_or_cancel(cancel, self.search.search(request)).await {
            CancelAware::Cancelled => {
                stats.failed = true;
                return stats;
            }
            CancelAware::Value(Ok(hits)) => hits,
            CancelAware::Value(Err(e)) => {
                warn!(subtask = %subtask.id, error = %e, "sub-query search failed; skipping");
                stats.failed = true;
                return stats;
            }
        };

        if !hits.is_empty() {
            stats.succeeded = true;
        }

        for hit in hits.into_iter().take(self.config.max_evidence_per_subtask) {
            let excerpt = if self.config.summarize_excerpts && budget.try_spend(COMPLETION_COST) {
                match self.summarize(&subtask.query, &hit.excerpt, cancel).await {
                    Some(summary) => summary,
                    None => hit.excerpt.clone(),
                }
            } else {
                hit.excerpt.clone()
            };

            let mut tags = vec!["web".to_string()];
            if topic == SearchTopic::News {
                tags.push("news".to_string());
            }
            let added = evidence.add(EvidenceCandidate {
                url: hit.url,
                title: hit.title,
                excerpt,
                published: hit.published,
                tool_call_id: format!("search:{}", subtask.id),
                tags,
            });
            if added {
                stats.added += 1;
            } else {
                stats.duplicates += 1;
            }
        }

        stats
    }

    async fn summarize(
        &self,
        sub_query: &str,
        excerpt: &str,
        cancel: &CancellationToken,
    ) -> Option<String> {
        let prompt = format!(
            "Condense the source excerpt below into 2-4 factual sentences \
             relevant to the research question \"{sub_query}\". Keep concrete \
             names, numbers, and dates.\nEXCERPT: {excerpt}"
        );
        let request =
            CompletionRequest::new(ModelRole::Researcher, prompt).with_temperature(0.2);
        match await_or_cancel(cancel, self.text.complete(request)).await {
            CancelAware::Value(Ok(summary)) if !summary.trim().is_empty() => Some(summary),
            CancelAware::Value(Ok(_)) => None,
            CancelAware::Value(Err(e)) => {
                warn!(error = %e, "excerpt summarization failed; keeping provider excerpt");
                None
            }
            CancelAware::Cancelled => None,
        }
    }
}

/// Refinement queries with a recency flavor search the news profile.
fn topic_for(subtask: &SubTask) -> SearchTopic {
    if subtask.iteration > 1 {
        let lower = subtask.query.to_lowercase();
        let recency_cues = ["latest", "recent", "news", "development", "update", "2024", "2025"];
        if recency_cues.iter().any(|cue| lower.contains(cue)) {
            return SearchTopic::News;
        }
    }
    SearchTopic::General
}
