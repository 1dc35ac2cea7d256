//! Iterative research orchestration for Minerva: the per-task evidence
//! store, the progress bus, the four research stages, and the state machine
//! that drives them under budget, deadline, and cancellation control.

mod budget;
mod bus;
mod cancel;
mod error;
mod evaluator;
mod evidence_store;
mod orchestrator;
mod planner;
mod researcher;
mod scoring;
mod writer;

pub use budget::{Budget, COMPLETION_COST, SEARCH_COST};
pub use bus::{ProgressBus, SubscribeError, DEFAULT_OBSERVER_BUFFER};
pub use cancel::{await_or_cancel, CancelAware};
pub use error::ResearchError;
pub use evaluator::Evaluator;
pub use evidence_store::{content_hash, EvidenceCandidate, EvidenceStore};
pub use orchestrator::{OrchestratorConfig, ResearchOrchestrator};
pub use planner::{Planner, SubTask};
pub use researcher::{IterationOutcome, Researcher, ResearcherConfig};
pub use scoring::{authority_score, recency_score, relevance_score, QualityWeights};
pub use writer::{DraftReport, Writer};
