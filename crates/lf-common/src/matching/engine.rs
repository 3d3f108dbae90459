use std::cmp::Ordering;

use tracing::debug;

use super::config::{ProximityMode, RankingConfig};
use crate::{
    embedding::{Embedding, similarity},
    geo::GeoPoint,
    post::{Post, PostType},
};

/// Inputs for one ranking pass. Every field is optional; an empty query
/// ranks purely by creation time.
#[derive(Debug, Clone, Default)]
pub struct MatchQuery {
    pub embedding: Option<Embedding>,
    pub location: Option<GeoPoint>,
    pub category: Option<String>,
    /// Title text, used only as a fallback signal.
    pub text: Option<String>,
    /// Candidates of this type are left out of the pool.
    pub exclude_type: Option<PostType>,
    pub exclude_post_id: Option<i64>,
}

impl MatchQuery {
    /// Post-to-post query: the other side of the LOST/FOUND partition,
    /// minus the post itself.
    pub fn for_post(post: &Post) -> Self {
        Self {
            embedding: post.embedding.clone(),
            location: post.point(),
            category: Some(post.category.clone()),
            text: Some(post.title.clone()),
            exclude_type: Some(post.post_type),
            exclude_post_id: Some(post.id),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreBreakdown {
    /// `None` when there was no similarity signal (no query embedding,
    /// no candidate embedding, or a dimension mismatch).
    pub similarity: Option<f64>,
    pub distance_meters: Option<f64>,
    pub proximity: f64,
    pub category: f64,
    pub text: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchCandidate {
    pub post: Post,
    pub score: f64,
    pub breakdown: ScoreBreakdown,
}

pub struct MatchingEngine {
    config: RankingConfig,
}

impl Default for MatchingEngine {
    fn default() -> Self {
        Self::new(RankingConfig::default())
    }
}

impl MatchingEngine {
    pub fn new(config: RankingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RankingConfig {
        &self.config
    }

    /// Scores every eligible post and returns them best first.
    ///
    /// Never fails: posts without a usable embedding simply get no similarity
    /// contribution. Ties are broken by `created_at` then `id`, so identical
    /// inputs always produce the same order.
    pub fn find_matches<I>(&self, query: &MatchQuery, posts: I) -> Vec<MatchCandidate>
    where
        I: IntoIterator<Item = Post>,
    {
        let mut ranked: Vec<_> = posts
            .into_iter()
            .filter(|post| in_pool(query, post))
            .filter_map(|post| self.score_candidate(query, post))
            .collect();

        ranked.sort_by(compare_candidates);

        if let Some(top_k) = self.config.top_k {
            ranked.truncate(top_k);
        }

        debug!(candidates = ranked.len(), "ranked match candidates");
        ranked
    }

    fn score_candidate(&self, query: &MatchQuery, post: Post) -> Option<MatchCandidate> {
        let similarity = match (&query.embedding, &post.embedding) {
            (Some(q), Some(c)) => similarity(q, c),
            _ => None,
        };

        let distance_meters = match (query.location, post.point()) {
            (Some(q), Some(c)) => Some(q.distance_meters(&c)),
            _ => None,
        };

        let inside_radius = distance_meters.is_some_and(|d| d <= self.config.radius_meters);
        if query.location.is_some()
            && self.config.proximity_mode == ProximityMode::Filter
            && !inside_radius
        {
            return None;
        }

        let proximity = distance_meters
            .map(|d| proximity_signal(d, self.config.radius_meters))
            .unwrap_or(0.0);
        let category = category_signal(query.category.as_deref(), &post.category);
        let text = text_signal(query.text.as_deref(), &post.title);

        let score = self.config.weights.combine(
            similarity.unwrap_or(0.0),
            proximity,
            category,
            text,
        );

        Some(MatchCandidate {
            post,
            score,
            breakdown: ScoreBreakdown {
                similarity,
                distance_meters,
                proximity,
                category,
                text,
            },
        })
    }
}

fn in_pool(query: &MatchQuery, post: &Post) -> bool {
    if query.exclude_type == Some(post.post_type) {
        return false;
    }
    query.exclude_post_id != Some(post.id)
}

/// 1.0 at the query point, 0.5 at the radius edge, 0.0 beyond.
fn proximity_signal(distance_meters: f64, radius_meters: f64) -> f64 {
    if distance_meters > radius_meters {
        return 0.0;
    }
    1.0 - 0.5 * (distance_meters / radius_meters)
}

/// Unicode case folding, same as [`text_signal`].
fn category_signal(query: Option<&str>, candidate: &str) -> f64 {
    match query.map(str::trim).filter(|q| !q.is_empty()) {
        Some(q) if q.to_lowercase() == candidate.trim().to_lowercase() => 1.0,
        _ => 0.0,
    }
}

fn text_signal(query: Option<&str>, title: &str) -> f64 {
    match query.map(str::trim).filter(|q| !q.is_empty()) {
        Some(q) if title.to_lowercase().contains(&q.to_lowercase()) => 1.0,
        _ => 0.0,
    }
}

fn compare_candidates(a: &MatchCandidate, b: &MatchCandidate) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.post.created_at.cmp(&b.post.created_at))
        .then_with(|| a.post.id.cmp(&b.post.id))
}
