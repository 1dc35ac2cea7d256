use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where an evidence excerpt was fetched from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceSource {
    pub url: String,
    pub title: String,
    pub fetched_at: DateTime<Utc>,
    /// Publication date when the provider reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published: Option<DateTime<Utc>>,
}

/// A single retained piece of evidence about the research query.
///
/// Immutable after creation. Uniqueness within a task is enforced by the
/// evidence store on `content_hash`, not on `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    /// Stable within the owning task.
    pub id: String,
    pub source: EvidenceSource,
    pub excerpt: String,
    /// SHA-256 hex digest of the normalized excerpt, used for dedup.
    pub content_hash: String,
    /// Which provider call produced this item, e.g. `search:T03`.
    pub tool_call_id: String,
    /// Quality score in [0, 1], computed once at insertion.
    pub quality: f64,
    pub tags: Vec<String>,
    /// Citation key the writer uses to reference this item, e.g. `S4`.
    pub cit_key: String,
}
