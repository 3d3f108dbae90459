pub mod config;
pub mod engine;
pub mod weights;

pub use config::{ConfigError, ProximityMode, RankingConfig};
pub use engine::{MatchCandidate, MatchQuery, MatchingEngine, ScoreBreakdown};
pub use weights::{DEFAULT_WEIGHTS, MatchWeights};
