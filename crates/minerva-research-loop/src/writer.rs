use crate::cancel::{await_or_cancel, CancelAware};
use crate::error::ResearchError;
use minerva_contract::{
    CompletionRequest, Evidence, ModelRole, ProviderError, TextProvider,
};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// A synthesized report body plus its generated bibliography.
#[derive(Debug, Clone)]
pub struct DraftReport {
    pub report_md: String,
    pub sources_bib: String,
    /// Citation keys the model used that were not in the snapshot; their
    /// mentions were stripped from the body.
    pub stripped_citations: Vec<String>,
}

/// Synthesizes the final markdown report from the evidence snapshot.
///
/// Citation keys form a closed vocabulary: the prompt offers exactly the
/// snapshot's keys, and post-processing strips anything the model invented.
/// The bibliography is generated from the snapshot, never by the model.
pub struct Writer {
    text: Arc<dyn TextProvider>,
}

impl Writer {
    pub fn new(text: Arc<dyn TextProvider>) -> Self {
        Self { text }
    }

    pub async fn write(
        &self,
        query: &str,
        evidence: &[Evidence],
        cancel: &CancellationToken,
    ) -> Result<DraftReport, ResearchError> {
        let prompt = build_prompt(query, evidence);
        let request = CompletionRequest::new(ModelRole::Writer, prompt)
            .with_temperature(0.7)
            .with_max_tokens(3000);

        let body = match await_or_cancel(cancel, self.text.complete(request)).await {
            CancelAware::Cancelled => return Err(ResearchError::Cancelled),
            CancelAware::Value(Ok(body)) => body,
            CancelAware::Value(Err(ProviderError::Cancelled)) => {
                return Err(ResearchError::Cancelled)
            }
            CancelAware::Value(Err(e)) => return Err(e.into()),
        };

        let known: HashSet<&str> = evidence.iter().map(|e| e.cit_key.as_str()).collect();
        let (report_md, stripped_citations) = strip_unknown_citations(&body, &known);
        for key in &stripped_citations {
            warn!(%key, "stripped citation not present in evidence snapshot");
        }

        Ok(DraftReport {
            report_md,
            sources_bib: bibliography(evidence),
            stripped_citations,
        })
    }
}

fn build_prompt(query: &str, evidence: &[Evidence]) -> String {
    let keys: Vec<&str> = evidence.iter().map(|e| e.cit_key.as_str()).collect();
    let evidence_blocks: Vec<String> = evidence
        .iter()
        .map(|e| {
            format!(
                "[{key}] {title} ({url})\n{excerpt}",
                key = e.cit_key,
                title = e.source.title,
                url = e.source.url,
                excerpt = e.excerpt,
            )
        })
        .collect();

    format!(
        "You are a research report writer. Write a comprehensive markdown \
         report answering the query from the evidence below.\n\
         USER QUERY: \"{query}\"\n\
         CITATION KEYS: {keys}\n\n\
         Structure: an H1 title, Executive Summary, Key Findings, Detailed \
         Analysis, and Conclusions. Cite evidence inline as [KEY] using ONLY \
         the citation keys listed above; never invent a key and do not write \
         a bibliography (it is generated separately).\n\n\
         EVIDENCE:\n---\n{blocks}\n---",
        keys = keys.join(", "),
        blocks = evidence_blocks.join("\n\n"),
    )
}

/// Bibliography block generated from the snapshot, one line per item.
fn bibliography(evidence: &[Evidence]) -> String {
    if evidence.is_empty() {
        return "## Sources\n\nNo sources were consulted.".to_string();
    }
    let mut lines = vec!["## Sources".to_string(), String::new()];
    for item in evidence {
        lines.push(format!(
            "- [{key}] {title} — {url} (fetched {fetched})",
            key = item.cit_key,
            title = item.source.title,
            url = item.source.url,
            fetched = item.source.fetched_at.format("%Y-%m-%d"),
        ));
    }
    lines.join("\n")
}

/// Remove `[KEY]` mentions whose key is not in the snapshot vocabulary.
///
/// Only citation-shaped tokens (`S` followed by digits) are considered;
/// ordinary bracketed text like markdown links passes through untouched.
fn strip_unknown_citations(body: &str, known: &HashSet<&str>) -> (String, Vec<String>) {
    let mut out = String::with_capacity(body.len());
    let mut stripped = Vec::new();
    let mut rest = body;

    while let Some(open) = rest.find('[') {
        let (before, after_open) = rest.split_at(open);
        out.push_str(before);
        let Some(close) = after_open.find(']') else {
            out.push_str(after_open);
            return (out, stripped);
        };
        let token = &after_open[1..close];
        if is_citation_shaped(token) && !known.contains(token) {
            if !stripped.contains(&token.to_string()) {
                stripped.push(token.to_string());
            }
            // Drop the mention and any space immediately before it.
            if out.ends_with(' ') {
                out.pop();
            }
        } else {
            out.push_str(&after_open[..=close]);
        }
        rest = &after_open[close + 1..];
    }
    out.push_str(rest);
    (out, stripped)
}

fn is_citation_shaped(token: &str) -> bool {
    let mut chars = token.chars();
    chars.next() == Some('S') && !token[1..].is_empty() && token[1..].chars().all(|c| c.is_ascii_digit())
}
