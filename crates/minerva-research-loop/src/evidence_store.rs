use crate::scoring::{quality_score, QualityWeights};
use chrono::{DateTime, Utc};
use minerva_contract::{Evidence, EvidenceSource};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, PoisonError};

/// Input to [`EvidenceStore::add`]; the store assigns id, hash, citation
/// key, and quality.
#[derive(Debug, Clone)]
pub struct EvidenceCandidate {
    pub url: String,
    pub title: String,
    pub excerpt: String,
    pub published: Option<DateTime<Utc>>,
    pub tool_call_id: String,
    pub tags: Vec<String>,
}

struct Inner {
    items: Vec<Evidence>,
    seen_hashes: HashSet<String>,
}

/// Per-task, append-only evidence collection with content dedup.
///
/// Owned by one orchestration and destroyed with it; quality weights are
/// frozen at construction. Safe to share across the researcher's sub-query
/// workers.
pub struct EvidenceStore {
    query: String,
    weights: QualityWeights,
    inner: Mutex<Inner>,
}

impl EvidenceStore {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            weights: QualityWeights::default(),
            inner: Mutex::new(Inner {
                items: Vec::new(),
                seen_hashes: HashSet::new(),
            }),
        }
    }

    /// Insert a candidate unless its normalized excerpt was already seen.
    /// Returns whether the item was added.
    pub fn add(&self, candidate: EvidenceCandidate) -> bool {
        let hash = content_hash(&candidate.excerpt);
        let quality = quality_score(
            self.weights,
            &self.query,
            &candidate.url,
            &candidate.excerpt,
            candidate.published,
        );

        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if !inner.seen_hashes.insert(hash.clone()) {
            return false;
        }
        let ordinal = inner.items.len() + 1;
        inner.items.push(Evidence {
            id: format!("ev-{ordinal:03}"),
            source: EvidenceSource {
                url: candidate.url,
                title: candidate.title,
                fetched_at: Utc::now(),
                published: candidate.published,
            },
            excerpt: candidate.excerpt,
            content_hash: hash,
            tool_call_id: candidate.tool_call_id,
            quality,
            tags: candidate.tags,
            cit_key: format!("S{ordinal}"),
        });
        true
    }

    /// All retained evidence in insertion order.
    pub fn snapshot(&self) -> Vec<Evidence> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .items
            .clone()
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .items
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// One-line summary of consulted hosts, e.g. `9 items from 4 sources`.
    pub fn sources_summary(&self) -> String {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let mut hosts: BTreeMap<String, usize> = BTreeMap::new();
        for item in &inner.items {
            let host = item
                .source
                .url
                .split("://")
                .nth(1)
                .and_then(|rest| rest.split('/').next())
                .unwrap_or("unknown")
                .trim_start_matches("www.")
                .to_string();
            *hosts.entry(host).or_default() += 1;
        }
        format!("{} items from {} sources", inner.items.len(), hosts.len())
    }
}

/// SHA-256 hex digest of the normalized excerpt.
///
/// Normalization: lowercase, whitespace collapsed, and query/fragment
/// suffixes stripped from any embedded URLs so tracking parameters do not
/// defeat dedup.
pub fn content_hash(excerpt: &str) -> String {
    let normalized = normalize_excerpt(excerpt);
    let digest = Sha256::digest(normalized.as_bytes());
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

fn normalize_excerpt(excerpt: &str) -> String {
    excerpt
        .split_whitespace()
        .map(|token| {
            let lowered = token.to_lowercase();
            if lowered.starts_with("http://") || lowered.starts_with("https://") {
                lowered
                    .split(['?', '#'])
                    .next()
                    .unwrap_or(&lowered)
                    .to_string()
            } else {
                lowered
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
