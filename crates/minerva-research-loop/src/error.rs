use minerva_contract::{ProviderError, TaskStoreError};
use thiserror::Error;

/// Terminal failures of a research run.
///
/// Budget exhaustion is deliberately absent: running out of budget is a
/// normal transition into report writing, not an error.
#[derive(Debug, Error)]
pub enum ResearchError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// A persistence failure that could not be degraded around (currently
    /// only the initial task-record write).
    #[error(transparent)]
    Store(#[from] TaskStoreError),

    #[error("cancelled")]
    Cancelled,

    #[error("deadline-exceeded")]
    DeadlineExceeded,

    #[error("internal error: {0}")]
    Internal(String),
}

impl ResearchError {
    /// Stable reason string carried on `failed` events and task details.
    pub fn reason(&self) -> String {
        match self {
            ResearchError::Cancelled => "cancelled".to_string(),
            ResearchError::DeadlineExceeded => "deadline-exceeded".to_string(),
            other => other.to_string(),
        }
    }
}
