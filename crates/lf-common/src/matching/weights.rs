/// Default combination weights.
/// Similarity dominates; proximity and category act as boosts, title text is
/// only a fallback signal.
pub const DEFAULT_WEIGHTS: MatchWeights = MatchWeights {
    embedding: 0.60,
    location: 0.20,
    category: 0.15,
    text: 0.05,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchWeights {
    pub embedding: f64,
    pub location: f64,
    pub category: f64,
    pub text: f64,
}

impl Default for MatchWeights {
    fn default() -> Self {
        DEFAULT_WEIGHTS
    }
}

impl MatchWeights {
    pub fn sum(&self) -> f64 {
        self.embedding + self.location + self.category + self.text
    }

    /// Every weight finite and non-negative, and at least one positive.
    pub fn is_valid(&self) -> bool {
        [self.embedding, self.location, self.category, self.text]
            .iter()
            .all(|w| w.is_finite() && *w >= 0.0)
            && self.sum() > 0.0
    }

    /// Weighted sum, always accumulated in the order
    /// embedding, location, category, text.
    pub fn combine(&self, similarity: f64, proximity: f64, category: f64, text: f64) -> f64 {
        let mut total = 0.0;
        total += self.embedding * similarity;
        total += self.location * proximity;
        total += self.category * category;
        total += self.text * text;
        total
    }
}
