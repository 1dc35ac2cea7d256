use crate::cancel::{await_or_cancel, CancelAware};
use crate::error::ResearchError;
use minerva_contract::{CompletionRequest, ModelRole, ProviderError, TextProvider};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// One decomposition leaf of the original query. Lives only in memory for
/// a single orchestration; never persisted.
#[derive(Debug, Clone)]
pub struct SubTask {
    pub id: String,
    pub query: String,
    /// Priority in [0, 1], highest first.
    pub priority: f64,
    /// Which iteration produced this sub-task (1-based).
    pub iteration: u32,
}

#[derive(Debug, Deserialize)]
struct WireSubTask {
    #[serde(default)]
    id: Option<String>,
    query: String,
    #[serde(default = "default_priority")]
    priority: f64,
}

fn default_priority() -> f64 {
    0.5
}

/// Decomposes a query into 3–8 prioritized sub-tasks via the planner model.
pub struct Planner {
    text: Arc<dyn TextProvider>,
}

impl Planner {
    pub fn new(text: Arc<dyn TextProvider>) -> Self {
        Self { text }
    }

    /// Produce the initial plan. Invalid model output gets one re-prompt
    /// citing the violation; a second failure falls back to a
    /// deterministic single-subtask plan around the original query.
    pub async fn plan(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<SubTask>, ResearchError> {
        let base_prompt = build_prompt(query);
        let mut prompt = base_prompt.clone();

        for attempt in 0..2 {
            let request =
                CompletionRequest::new(ModelRole::Planner, prompt.clone()).with_temperature(0.4);
            let outcome = await_or_cancel(cancel, self.text.complete_json(request)).await;
            let value = match outcome {
                CancelAware::Cancelled => return Err(ResearchError::Cancelled),
                CancelAware::Value(Ok(value)) => value,
                CancelAware::Value(Err(ProviderError::Cancelled)) => {
                    return Err(ResearchError::Cancelled)
                }
                // Unparseable even after gateway repair: same treatment as
                // a constraint violation, ending in the fallback plan.
                CancelAware::Value(Err(ProviderError::Shape(e))) => {
                    warn!(attempt, error = %e, "planner returned unparseable output");
                    continue;
                }
                CancelAware::Value(Err(e)) => return Err(e.into()),
            };

            match parse_and_validate(value) {
                Ok(subtasks) => return Ok(subtasks),
                Err(violation) => {
                    warn!(attempt, %violation, "planner output rejected");
                    prompt = format!(
                        "{base_prompt}\n\nYour previous plan was rejected: {violation}. \
                         Produce a corrected plan that satisfies every constraint."
                    );
                }
            }
        }

        Ok(fallback_plan(query))
    }
}

fn build_prompt(query: &str) -> String {
    format!(
        "You are a research planning agent. Decompose the query below into \
         between 3 and 8 focused web-research sub-tasks.\n\
         USER QUERY: \"{query}\"\n\n\
         Respond with ONLY a JSON array, one object per sub-task:\n\
         [{{\"id\": \"T01\", \"query\": \"...\", \"priority\": 0.9}}]\n\
         Constraints: priority is a number in [0,1]; queries must be \
         non-empty, mutually distinct, and directly searchable."
    )
}

fn fallback_plan(query: &str) -> Vec<SubTask> {
    vec![SubTask {
        id: "T01".to_string(),
        query: query.to_string(),
        priority: 1.0,
        iteration: 1,
    }]
}

fn parse_and_validate(value: serde_json::Value) -> Result<Vec<SubTask>, String> {
    let wire: Vec<WireSubTask> =
        serde_json::from_value(value).map_err(|e| format!("not a sub-task array: {e}"))?;

    if !(3..=8).contains(&wire.len()) {
        return Err(format!("expected 3..=8 sub-tasks, got {}", wire.len()));
    }

    let mut seen = HashSet::new();
    for task in &wire {
        if task.query.trim().is_empty() {
            return Err("sub-task with empty query".to_string());
        }
        if !(0.0..=1.0).contains(&task.priority) {
            return Err(format!("priority {} outside [0,1]", task.priority));
        }
        if !seen.insert(task.query.trim().to_lowercase()) {
            return Err(format!("duplicate sub-task query: {:?}", task.query.trim()));
        }
    }

    Ok(wire
        .into_iter()
        .enumerate()
        .map(|(i, task)| SubTask {
            id: task.id.unwrap_or_else(|| format!("T{:02}", i + 1)),
            query: task.query.trim().to_string(),
            priority: task.priority,
            iteration: 1,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use minerva_contract::ProviderError;
    use serde_json::json;
    use std::sync::Mutex;

    /// Text provider returning scripted replies in order.
    struct ScriptedProvider {
        replies: Mutex<Vec<Result<serde_json::Value, ProviderError>>>,
        calls: Mutex<usize>,
    }

    impl ScriptedProvider {
        fn new(replies: Vec<serde_json::Value>) -> Self {
            Self::with_results(replies.into_iter().map(Ok).collect())
        }

        fn with_results(replies: Vec<Result<serde_json::Value, ProviderError>>) -> Self {
            Self {
                replies: Mutex::new(replies),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl TextProvider for ScriptedProvider {
        async fn complete(&self, _: CompletionRequest) -> Result<String, ProviderError> {
            unimplemented!("planner only uses complete_json")
        }

        async fn complete_json(
            &self,
            _: CompletionRequest,
        ) -> Result<serde_json::Value, ProviderError> {
            *self.calls.lock().unwrap() += 1;
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                return Err(ProviderError::Transport("script exhausted".into()));
            }
            replies.remove(0)
        }
    }

    fn valid_plan_json() -> serde_json::Value {
        json!([
            {"id": "T01", "query": "alpha", "priority": 0.9},
            {"id": "T02", "query": "beta", "priority": 0.6},
            {"id": "T03", "query": "gamma", "priority": 0.3},
        ])
    }

    #[tokio::test]
    async fn accepts_valid_plan() {
        let provider = Arc::new(ScriptedProvider::new(vec![valid_plan_json()]));
        let planner = Planner::new(provider.clone());
        let plan = planner
            .plan("query", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(plan.len(), 3);
        assert_eq!(plan[0].query, "alpha");
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn reprompts_once_on_violation_then_accepts() {
        let too_few = json!([{"query": "only one", "priority": 0.5}]);
        let provider = Arc::new(ScriptedProvider::new(vec![too_few, valid_plan_json()]));
        let planner = Planner::new(provider.clone());
        let plan = planner
            .plan("query", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(plan.len(), 3);
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn falls_back_after_second_violation() {
        let duplicate = json!([
            {"query": "same", "priority": 0.5},
            {"query": "SAME", "priority": 0.5},
            {"query": "other", "priority": 0.5},
        ]);
        let provider = Arc::new(ScriptedProvider::new(vec![duplicate.clone(), duplicate]));
        let planner = Planner::new(provider.clone());
        let plan = planner
            .plan("original query", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].query, "original query");
        assert_eq!(plan[0].priority, 1.0);
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn unparseable_output_falls_back_to_single_subtask() {
        let provider = Arc::new(ScriptedProvider::with_results(vec![
            Err(ProviderError::Shape("garbage".into())),
            Err(ProviderError::Shape("still garbage".into())),
        ]));
        let planner = Planner::new(provider.clone());
        let plan = planner
            .plan("original query", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].query, "original query");
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn provider_failure_surfaces_to_caller() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let planner = Planner::new(provider);
        let err = planner
            .plan("q", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ResearchError::Provider(_)));
    }

    #[test]
    fn rejects_out_of_range_priority() {
        let bad = json!([
            {"query": "a", "priority": 1.2},
            {"query": "b", "priority": 0.5},
            {"query": "c", "priority": 0.5},
        ]);
        assert!(parse_and_validate(bad).is_err());
    }
}
