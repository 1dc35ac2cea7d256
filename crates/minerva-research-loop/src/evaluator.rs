use crate::cancel::{await_or_cancel, CancelAware};
use crate::error::ResearchError;
use minerva_contract::{
    CompletionLevel, CompletionRequest, CoverageDimensions, EvaluationResult, Evidence, Gap,
    ModelRole, ProviderError, TextProvider,
};
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// How many evidence items count as "enough" for the conservative
/// fallback score.
const FALLBACK_TARGET_EVIDENCE: usize = 10;

/// Evidence items summarized into the evaluation prompt at most.
const DIGEST_ITEMS: usize = 10;
/// Excerpt characters quoted per digest item.
const DIGEST_SNIPPET_CHARS: usize = 150;

#[derive(Debug, Deserialize)]
struct WireEvaluation {
    #[serde(default)]
    overall_score: Option<f64>,
    dimensions: WireDimensions,
    #[serde(default)]
    gaps: Vec<WireGap>,
    #[serde(default)]
    refinements: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct WireDimensions {
    factual: f64,
    source_diversity: f64,
    temporal: f64,
    perspective: f64,
    depth: f64,
}

#[derive(Debug, Deserialize)]
struct WireGap {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default = "default_gap_priority")]
    priority: u8,
    #[serde(default)]
    suggested_query: String,
}

fn default_gap_priority() -> u8 {
    3
}

/// Scores evidence completeness across coverage dimensions and proposes
/// refinement queries for the gaps it finds.
pub struct Evaluator {
    text: Arc<dyn TextProvider>,
}

impl Evaluator {
    pub fn new(text: Arc<dyn TextProvider>) -> Self {
        Self { text }
    }

    /// Evaluate the evidence snapshot against the original query.
    ///
    /// Unusable model output gets one re-prompt; a second failure returns
    /// the conservative fallback rather than failing the task.
    pub async fn evaluate(
        &self,
        query: &str,
        evidence: &[Evidence],
        cancel: &CancellationToken,
    ) -> Result<EvaluationResult, ResearchError> {
        let base_prompt = build_prompt(query, evidence);
        let mut prompt = base_prompt.clone();

        for attempt in 0..2 {
            let request =
                CompletionRequest::new(ModelRole::Evaluator, prompt.clone()).with_temperature(0.3);
            let value = match await_or_cancel(cancel, self.text.complete_json(request)).await {
                CancelAware::Cancelled => return Err(ResearchError::Cancelled),
                CancelAware::Value(Ok(value)) => value,
                CancelAware::Value(Err(ProviderError::Cancelled)) => {
                    return Err(ResearchError::Cancelled)
                }
                // Unparseable even after gateway repair: same treatment as
                // a constraint violation, ending in the conservative result.
                CancelAware::Value(Err(ProviderError::Shape(e))) => {
                    warn!(attempt, error = %e, "evaluator returned unparseable output");
                    continue;
                }
                CancelAware::Value(Err(e)) => return Err(e.into()),
            };

            match convert(value) {
                Ok(result) => return Ok(result),
                Err(violation) => {
                    warn!(attempt, %violation, "evaluator output rejected");
                    prompt = format!(
                        "{base_prompt}\n\nYour previous evaluation was rejected: {violation}. \
                         Produce a corrected JSON evaluation."
                    );
                }
            }
        }

        Ok(EvaluationResult::conservative(
            evidence.len(),
            FALLBACK_TARGET_EVIDENCE,
        ))
    }
}

fn build_prompt(query: &str, evidence: &[Evidence]) -> String {
    format!(
        "You are a research evaluation agent. Judge how completely the \
         collected evidence answers the query.\n\
         USER QUERY: \"{query}\"\n\n\
         EVIDENCE COLLECTED:\n{digest}\n\n\
         Respond with ONLY a JSON object:\n\
         {{\"overall_score\": 0.0-1.0,\n \
         \"dimensions\": {{\"factual\": .., \"source_diversity\": .., \
         \"temporal\": .., \"perspective\": .., \"depth\": ..}},\n \
         \"gaps\": [{{\"name\": \"slug\", \"description\": \"..\", \
         \"priority\": 1-5, \"suggested_query\": \"..\"}}],\n \
         \"refinements\": [\"follow-up search query\", ..]}}\n\
         List 0-7 gaps and 0-5 refinement queries, most important first.",
        digest = digest(evidence),
    )
}

fn digest(evidence: &[Evidence]) -> String {
    if evidence.is_empty() {
        return "No evidence collected yet.".to_string();
    }
    let mut lines = Vec::new();
    for (i, item) in evidence.iter().take(DIGEST_ITEMS).enumerate() {
        let snippet: String = item.excerpt.chars().take(DIGEST_SNIPPET_CHARS).collect();
        lines.push(format!(
            "{}. {} ({})\n   {}",
            i + 1,
            item.source.title,
            item.source.url,
            snippet
        ));
    }
    if evidence.len() > DIGEST_ITEMS {
        lines.push(format!(
            "... and {} more evidence items",
            evidence.len() - DIGEST_ITEMS
        ));
    }
    lines.join("\n")
}

fn convert(value: serde_json::Value) -> Result<EvaluationResult, String> {
    let wire: WireEvaluation =
        serde_json::from_value(value).map_err(|e| format!("missing or malformed fields: {e}"))?;

    let dimensions = CoverageDimensions {
        factual: wire.dimensions.factual,
        source_diversity: wire.dimensions.source_diversity,
        temporal: wire.dimensions.temporal,
        perspective: wire.dimensions.perspective,
        depth: wire.dimensions.depth,
    };
    for (name, value) in [
        ("factual", dimensions.factual),
        ("source_diversity", dimensions.source_diversity),
        ("temporal", dimensions.temporal),
        ("perspective", dimensions.perspective),
        ("depth", dimensions.depth),
    ] {
        if !(0.0..=1.0).contains(&value) {
            return Err(format!("dimension {name}={value} outside [0,1]"));
        }
    }

    // The model's overall score wins when present; otherwise the
    // dimensions are averaged with equal weight.
    let overall_score = match wire.overall_score {
        Some(score) if (0.0..=1.0).contains(&score) => score,
        Some(score) => return Err(format!("overall_score {score} outside [0,1]")),
        None => dimensions.mean(),
    };

    let gaps: Vec<Gap> = wire
        .gaps
        .into_iter()
        .filter(|g| !g.name.trim().is_empty())
        .map(|g| Gap {
            name: g.name,
            description: g.description,
            priority: g.priority.clamp(1, 5),
            suggested_query: g.suggested_query,
        })
        .collect();

    // Fall back to the gaps' suggested queries when the model omits an
    // explicit refinement list.
    let mut refinements: Vec<String> = wire
        .refinements
        .into_iter()
        .filter(|q| !q.trim().is_empty())
        .collect();
    if refinements.is_empty() {
        refinements = gaps
            .iter()
            .filter(|g| !g.suggested_query.trim().is_empty())
            .map(|g| g.suggested_query.clone())
            .collect();
    }

    Ok(EvaluationResult {
        overall_score,
        level: CompletionLevel::from_score(overall_score),
        dimensions,
        gaps,
        refinements,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use minerva_contract::EvidenceSource;
    use serde_json::json;
    use std::sync::Mutex;

    struct ScriptedProvider {
        replies: Mutex<Vec<Result<serde_json::Value, ProviderError>>>,
    }

    #[async_trait]
    impl TextProvider for ScriptedProvider {
        async fn complete(&self, _: CompletionRequest) -> Result<String, ProviderError> {
            unimplemented!("evaluator only uses complete_json")
        }
        async fn complete_json(
            &self,
            _: CompletionRequest,
        ) -> Result<serde_json::Value, ProviderError> {
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                return Err(ProviderError::Shape("script exhausted".into()));
            }
            replies.remove(0)
        }
    }

    fn evaluator(replies: Vec<Result<serde_json::Value, ProviderError>>) -> Evaluator {
        Evaluator::new(Arc::new(ScriptedProvider {
            replies: Mutex::new(replies),
        }))
    }

    fn sample_evidence(n: usize) -> Vec<Evidence> {
        (0..n)
            .map(|i| Evidence {
                id: format!("ev-{i:03}"),
                source: EvidenceSource {
                    url: format!("https://example.org/{i}"),
                    title: format!("Item {i}"),
                    fetched_at: Utc::now(),
                    published: None,
                },
                excerpt: format!("excerpt {i}"),
                content_hash: format!("{i:064}"),
                tool_call_id: "search:T01".to_string(),
                quality: 0.5,
                tags: vec![],
                cit_key: format!("S{}", i + 1),
            })
            .collect()
    }

    fn valid_eval() -> serde_json::Value {
        json!({
            "overall_score": 0.82,
            "dimensions": {
                "factual": 0.9, "source_diversity": 0.7, "temporal": 0.8,
                "perspective": 0.8, "depth": 0.9
            },
            "gaps": [{"name": "recent_news", "description": "d", "priority": 4,
                      "suggested_query": "latest news"}],
            "refinements": ["latest news"],
        })
    }

    #[tokio::test]
    async fn parses_valid_evaluation() {
        let result = evaluator(vec![Ok(valid_eval())])
            .evaluate("q", &sample_evidence(3), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.overall_score, 0.82);
        assert_eq!(result.level, CompletionLevel::Substantial);
        assert_eq!(result.gaps.len(), 1);
        assert_eq!(result.refinements, vec!["latest news"]);
    }

    #[tokio::test]
    async fn missing_overall_score_uses_dimension_mean() {
        let mut eval = valid_eval();
        eval.as_object_mut().unwrap().remove("overall_score");
        let result = evaluator(vec![Ok(eval)])
            .evaluate("q", &sample_evidence(3), &CancellationToken::new())
            .await
            .unwrap();
        assert!((result.overall_score - 0.82).abs() < 1e-9);
    }

    #[tokio::test]
    async fn out_of_range_score_reprompts_then_falls_back() {
        let mut bad = valid_eval();
        bad["overall_score"] = json!(1.7);
        let result = evaluator(vec![Ok(bad.clone()), Ok(bad)])
            .evaluate("q", &sample_evidence(4), &CancellationToken::new())
            .await
            .unwrap();
        // Conservative fallback: min(4/10, 0.5).
        assert!((result.overall_score - 0.4).abs() < 1e-9);
        assert_eq!(result.level, CompletionLevel::Partial);
        assert!(result.refinements.is_empty());
    }

    #[tokio::test]
    async fn refinements_derived_from_gaps_when_omitted() {
        let mut eval = valid_eval();
        eval["refinements"] = json!([]);
        let result = evaluator(vec![Ok(eval)])
            .evaluate("q", &sample_evidence(1), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.refinements, vec!["latest news"]);
    }

    #[tokio::test]
    async fn unparseable_output_retries_then_yields_conservative_result() {
        let result = evaluator(vec![
            Err(ProviderError::Shape("garbage".into())),
            Err(ProviderError::Shape("still garbage".into())),
        ])
        .evaluate("q", &sample_evidence(20), &CancellationToken::new())
        .await
        .unwrap();
        assert_eq!(result.overall_score, 0.5);
    }

    #[tokio::test]
    async fn unparseable_first_reply_does_not_burn_the_retry() {
        // A transient garbage reply followed by a good one still evaluates.
        let result = evaluator(vec![
            Err(ProviderError::Shape("garbage".into())),
            Ok(valid_eval()),
        ])
        .evaluate("q", &sample_evidence(3), &CancellationToken::new())
        .await
        .unwrap();
        assert_eq!(result.overall_score, 0.82);
    }

    #[tokio::test]
    async fn transport_failure_surfaces_to_caller() {
        let err = evaluator(vec![Err(ProviderError::Transport("down".into()))])
            .evaluate("q", &sample_evidence(2), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ResearchError::Provider(_)));
    }

    #[test]
    fn digest_bounds_items_and_snippets() {
        let evidence = sample_evidence(15);
        let text = digest(&evidence);
        assert!(text.contains("... and 5 more evidence items"));
        assert!(!text.contains("Item 12"));
    }
}
