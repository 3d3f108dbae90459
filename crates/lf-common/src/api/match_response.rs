use serde::{Deserialize, Serialize};

use super::PostResponse;
use crate::matching::{MatchCandidate, ScoreBreakdown};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBreakdownResponse {
    pub similarity: Option<f64>,
    pub distance_meters: Option<f64>,
    pub proximity: f64,
    pub category: f64,
    pub text: f64,
}

impl From<&ScoreBreakdown> for ScoreBreakdownResponse {
    fn from(b: &ScoreBreakdown) -> Self {
        Self {
            similarity: b.similarity,
            distance_meters: b.distance_meters,
            proximity: b.proximity,
            category: b.category,
            text: b.text,
        }
    }
}

/// One ranked candidate for `GET /api/posts/:id/matches`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResponse {
    pub post: PostResponse,
    pub score: f64,
    pub breakdown: ScoreBreakdownResponse,
}

impl From<&MatchCandidate> for MatchResponse {
    fn from(candidate: &MatchCandidate) -> Self {
        Self {
            post: PostResponse::from(&candidate.post),
            score: candidate.score,
            breakdown: ScoreBreakdownResponse::from(&candidate.breakdown),
        }
    }
}
