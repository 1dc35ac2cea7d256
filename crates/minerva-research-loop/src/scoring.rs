use chrono::{DateTime, Utc};

/// Weighting of the quality sub-scores; fixed for the whole orchestration.
#[derive(Debug, Clone, Copy)]
pub struct QualityWeights {
    pub authority: f64,
    pub relevance: f64,
    pub recency: f64,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            authority: 0.6,
            relevance: 0.3,
            recency: 0.1,
        }
    }
}

/// Neutral value used whenever a sub-score cannot be computed.
const UNKNOWN: f64 = 0.5;

/// Bounded host → authority table; anything not listed scores neutral.
const HOST_AUTHORITY: &[(&str, f64)] = &[
    ("arxiv.org", 0.9),
    ("nature.com", 0.9),
    ("science.org", 0.9),
    ("acm.org", 0.85),
    ("ieee.org", 0.85),
    ("nih.gov", 0.9),
    ("wikipedia.org", 0.8),
    ("github.com", 0.75),
    ("stackoverflow.com", 0.7),
    ("reuters.com", 0.85),
    ("apnews.com", 0.85),
    ("bbc.com", 0.8),
    ("bbc.co.uk", 0.8),
    ("nytimes.com", 0.8),
    ("ft.com", 0.8),
    ("economist.com", 0.8),
    ("medium.com", 0.4),
    ("reddit.com", 0.35),
];

/// Lowercased host of a URL, without a leading `www.`.
fn host_of(url: &str) -> Option<String> {
    let rest = url.split("://").nth(1)?;
    let host = rest.split(['/', '?', '#']).next()?;
    let host = host.split('@').next_back()?.split(':').next()?;
    let host = host.trim().to_lowercase();
    (!host.is_empty()).then(|| host.trim_start_matches("www.").to_string())
}

/// Authority of the source host. Suffix match covers subdomains and the
/// `.gov` / `.edu` families.
pub fn authority_score(url: &str) -> f64 {
    let Some(host) = host_of(url) else {
        return UNKNOWN;
    };
    for (known, score) in HOST_AUTHORITY {
        if host == *known || host.ends_with(&format!(".{known}")) {
            return *score;
        }
    }
    if host.ends_with(".gov") {
        return 0.9;
    }
    if host.ends_with(".edu") {
        return 0.85;
    }
    UNKNOWN
}

fn tokens(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2)
        .map(str::to_string)
        .collect()
}

/// Cosine-like lexical overlap between the query and an excerpt.
pub fn relevance_score(query: &str, excerpt: &str) -> f64 {
    let query_tokens: std::collections::HashSet<String> = tokens(query).into_iter().collect();
    let excerpt_tokens: std::collections::HashSet<String> = tokens(excerpt).into_iter().collect();
    if query_tokens.is_empty() || excerpt_tokens.is_empty() {
        return UNKNOWN;
    }
    let shared = query_tokens.intersection(&excerpt_tokens).count() as f64;
    let denom = (query_tokens.len() as f64 * excerpt_tokens.len() as f64).sqrt();
    (shared / denom).clamp(0.0, 1.0)
}

/// Exponential decay over days since publication, half-life one year.
pub fn recency_score(published: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    let Some(published) = published else {
        return UNKNOWN;
    };
    let days = (now - published).num_days().max(0) as f64;
    0.5_f64.powf(days / 365.0)
}

/// Combined insertion-time quality score in [0, 1].
pub fn quality_score(
    weights: QualityWeights,
    query: &str,
    url: &str,
    excerpt: &str,
    published: Option<DateTime<Utc>>,
) -> f64 {
    let authority = authority_score(url);
    let relevance = relevance_score(query, excerpt);
    let recency = recency_score(published, Utc::now());
    (weights.authority * authority + weights.relevance * relevance + weights.recency * recency)
        .clamp(0.0, 1.0)
}
