use serde::{Deserialize, Serialize};

/// Discrete completion level derived from the overall score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionLevel {
    Insufficient,
    Partial,
    Substantial,
    Comprehensive,
}

impl CompletionLevel {
    /// Map an overall score in [0, 1] onto its level band.
    pub fn from_score(score: f64) -> Self {
        if score < 0.5 {
            CompletionLevel::Insufficient
        } else if score < 0.75 {
            CompletionLevel::Partial
        } else if score < 0.9 {
            CompletionLevel::Substantial
        } else {
            CompletionLevel::Comprehensive
        }
    }
}

impl std::fmt::Display for CompletionLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CompletionLevel::Insufficient => "insufficient",
            CompletionLevel::Partial => "partial",
            CompletionLevel::Substantial => "substantial",
            CompletionLevel::Comprehensive => "comprehensive",
        };
        f.write_str(s)
    }
}

/// Per-dimension coverage sub-scores, each in [0, 1].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CoverageDimensions {
    pub factual: f64,
    pub source_diversity: f64,
    pub temporal: f64,
    pub perspective: f64,
    pub depth: f64,
}

impl CoverageDimensions {
    /// Equal-weight mean of the five dimensions.
    pub fn mean(&self) -> f64 {
        (self.factual + self.source_diversity + self.temporal + self.perspective + self.depth)
            / 5.0
    }

    pub fn uniform(value: f64) -> Self {
        Self {
            factual: value,
            source_diversity: value,
            temporal: value,
            perspective: value,
            depth: value,
        }
    }
}

/// A named dimension along which the evaluator judged evidence insufficient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gap {
    /// Short slug, e.g. `missing_recent_developments`.
    pub name: String,
    pub description: String,
    /// 1..=5, 5 highest.
    pub priority: u8,
    /// A search query the evaluator suggests to close this gap.
    pub suggested_query: String,
}

/// Outcome of one evaluation pass over the accumulated evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// Overall completion score in [0, 1].
    pub overall_score: f64,
    pub level: CompletionLevel,
    pub dimensions: CoverageDimensions,
    pub gaps: Vec<Gap>,
    /// Refinement sub-queries, highest priority first.
    pub refinements: Vec<String>,
}

impl EvaluationResult {
    /// Conservative fallback used when the evaluator output is unusable:
    /// score scales with evidence volume but never signals convergence.
    pub fn conservative(evidence_count: usize, target: usize) -> Self {
        let ratio = if target == 0 {
            0.0
        } else {
            evidence_count as f64 / target as f64
        };
        let score = ratio.min(0.5);
        Self {
            overall_score: score,
            level: CompletionLevel::Partial,
            dimensions: CoverageDimensions::uniform(score),
            gaps: Vec::new(),
            refinements: Vec::new(),
        }
    }
}
