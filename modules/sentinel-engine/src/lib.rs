//! The item-processing engine: deduplication, filter evaluation, scoring,
//! and engagement-based preference learning.

pub mod dedup;
pub mod filter;
pub mod preferences;
pub mod scorer;

pub use dedup::{DedupIndex, DedupOutcome, Deduplicator};
pub use filter::{Condition, FilterEngine, FilterMatch, FilterResult};
pub use preferences::{LearningConfig, PreferenceLearner};
pub use scorer::{rank, ScoreBreakdown, ScoreContext, ScoredItem, Scorer, ScoringWeights};
