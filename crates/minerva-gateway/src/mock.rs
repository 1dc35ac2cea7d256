use crate::search::validate;
use crate::text::extract_json_value;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use minerva_contract::{
    CompletionRequest, ModelRole, ProviderError, SearchHit, SearchProvider, SearchRequest,
    TextProvider,
};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

/// Stable 64-bit fingerprint of a string, identical across runs.
fn stable_hash(input: &str) -> u64 {
    let digest = Sha256::digest(input.as_bytes());
    u64::from_be_bytes(digest[..8].try_into().unwrap_or([0u8; 8]))
}

/// First quoted segment after `marker`, used to recover the query a stage
/// embedded in its prompt.
fn extract_quoted(prompt: &str, marker: &str) -> Option<String> {
    let rest = &prompt[prompt.find(marker)? + marker.len()..];
    let start = rest.find('"')? + 1;
    let end = start + rest[start..].find('"')?;
    Some(rest[start..end].to_string())
}

/// Remainder of the line following `marker`.
fn extract_line(prompt: &str, marker: &str) -> Option<String> {
    let rest = &prompt[prompt.find(marker)? + marker.len()..];
    let line = rest.lines().next()?.trim();
    (!line.is_empty()).then(|| line.to_string())
}

/// Deterministic text-completion stand-in used when no credential is
/// configured. Output shape matches the live provider for every role, so the
/// whole pipeline runs end-to-end without network access.
#[derive(Debug, Default)]
pub struct MockTextProvider;

impl MockTextProvider {
    pub fn new() -> Self {
        Self
    }

    fn planner_reply(prompt: &str) -> String {
        let query = extract_quoted(prompt, "USER QUERY:").unwrap_or_else(|| "the topic".into());
        json!([
            {"id": "T01", "query": format!("{query} overview and background"), "priority": 0.9},
            {"id": "T02", "query": format!("{query} recent developments"), "priority": 0.8},
            {"id": "T03", "query": format!("{query} challenges and open problems"), "priority": 0.7},
        ])
        .to_string()
    }

    fn evaluator_reply(prompt: &str) -> String {
        let query = extract_quoted(prompt, "USER QUERY:").unwrap_or_else(|| "the topic".into());
        let h = stable_hash(prompt);
        let score = 0.6 + (h % 30) as f64 / 100.0;
        let dim = |offset: u64| 0.5 + ((h >> offset) % 40) as f64 / 100.0;
        json!({
            "overall_score": score,
            "dimensions": {
                "factual": dim(8),
                "source_diversity": dim(16),
                "temporal": dim(24),
                "perspective": dim(32),
                "depth": dim(40),
            },
            "gaps": [
                {
                    "name": "recent_developments",
                    "description": "Coverage of the most recent developments is thin",
                    "priority": 4,
                    "suggested_query": format!("{query} latest developments"),
                },
                {
                    "name": "perspective_balance",
                    "description": "Few independent or critical viewpoints collected",
                    "priority": 3,
                    "suggested_query": format!("{query} criticism and independent analysis"),
                },
            ],
            "refinements": [
                format!("{query} latest developments"),
                format!("{query} criticism and independent analysis"),
            ],
        })
        .to_string()
    }

    fn writer_reply(prompt: &str) -> String {
        let query = extract_quoted(prompt, "USER QUERY:").unwrap_or_else(|| "the topic".into());
        let keys: Vec<String> = extract_line(prompt, "CITATION KEYS:")
            .map(|line| {
                line.split(',')
                    .map(|k| k.trim().to_string())
                    .filter(|k| !k.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let mut cite = keys.iter().cycle();
        let mut next_cite = || {
            cite.next()
                .map(|k| format!(" [{k}]"))
                .unwrap_or_default()
        };

        let mut body = format!("# Research Report: {query}\n\n## Executive Summary\n\n");
        body.push_str(&format!(
            "This report synthesizes the evidence collected on {query}. The sources \
             reviewed converge on a small number of load-bearing findings, summarized \
             below with citations into the collected evidence{}.\n\n## Key Findings\n\n",
            next_cite()
        ));
        for (i, _) in keys.iter().enumerate().take(5) {
            body.push_str(&format!(
                "- Finding {}: the collected material documents a distinct aspect of \
                 {query}, with supporting detail in the cited source{}.\n",
                i + 1,
                next_cite()
            ));
        }
        body.push_str(&format!(
            "\n## Detailed Analysis\n\nAcross the evidence base, the picture of {query} \
             is consistent: primary sources describe the current state of the field, \
             while secondary commentary situates it against adjacent work{}. Where \
             sources disagree, the disagreement is noted rather than resolved, and the \
             stronger-sourced claim is preferred{}. Temporal coverage spans both \
             foundational material and recent reporting, which bounds the risk of \
             stale conclusions{}.\n\n## Conclusions\n\nThe evidence supports a \
             confident summary of {query} at the level of detail collected here. \
             Remaining uncertainty is concentrated in the gaps identified during \
             evaluation, which future iterations would close{}.\n",
            next_cite(),
            next_cite(),
            next_cite(),
            next_cite()
        ));
        body
    }

    fn researcher_reply(prompt: &str) -> String {
        match prompt.find("EXCERPT:") {
            Some(idx) => {
                let excerpt = prompt[idx + "EXCERPT:".len()..].trim();
                let mut out: String = excerpt.chars().take(400).collect();
                if excerpt.chars().count() > 400 {
                    out.push('…');
                }
                out
            }
            None => "No source excerpt was provided.".to_string(),
        }
    }
}

#[async_trait]
impl TextProvider for MockTextProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<String, ProviderError> {
        if request.prompt.trim().is_empty() {
            return Err(ProviderError::InvalidInput("empty prompt".to_string()));
        }
        Ok(match request.role {
            ModelRole::Planner => Self::planner_reply(&request.prompt),
            ModelRole::Evaluator => Self::evaluator_reply(&request.prompt),
            ModelRole::Writer => Self::writer_reply(&request.prompt),
            ModelRole::Researcher => Self::researcher_reply(&request.prompt),
        })
    }

    async fn complete_json(&self, request: CompletionRequest) -> Result<Value, ProviderError> {
        let text = self.complete(request).await?;
        extract_json_value(&text).map_err(ProviderError::Shape)
    }
}

/// Deterministic search stand-in with production-shape hits.
#[derive(Debug, Default)]
pub struct MockSearchProvider;

impl MockSearchProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SearchProvider for MockSearchProvider {
    async fn search(&self, request: SearchRequest) -> Result<Vec<SearchHit>, ProviderError> {
        validate(&request)?;
        let slug: String = request
            .query
            .to_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect::<String>()
            .split('-')
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("-");
        let h = stable_hash(&request.query);

        let hits = (0..request.max_results.min(3))
            .map(|i| {
                let published_secs = 1_750_000_000 - ((h.rotate_left(i as u32) % 365) * 86_400);
                SearchHit {
                    url: format!("https://example.org/{slug}/{i}"),
                    title: format!("Reference {} on {}", i + 1, request.query),
                    excerpt: format!(
                        "Synthetic source {} covering {}: background, current status, \
                         and notable open questions collected for offline operation.",
                        i + 1,
                        request.query
                    ),
                    published: DateTime::<Utc>::from_timestamp(published_secs as i64, 0),
                    relevance: Some(0.9 - 0.1 * i as f64),
                }
            })
            .collect();
        Ok(hits)
    }
}
