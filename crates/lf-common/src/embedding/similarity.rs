use tracing::debug;

use super::Embedding;

/// Raw cosine similarity in [-1, 1].
///
/// `None` when the vectors cannot be compared: different lengths, empty, or
/// zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() {
        debug!(
            a_len = a.len(),
            b_len = b.len(),
            "embedding dimension mismatch; no similarity signal"
        );
        return None;
    }
    if a.is_empty() {
        return None;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }

    let cos = dot / (norm_a.sqrt() * norm_b.sqrt());
    cos.is_finite().then(|| cos.clamp(-1.0, 1.0))
}

/// Similarity rescaled to [0, 1]; higher means more alike.
pub fn similarity(a: &Embedding, b: &Embedding) -> Option<f64> {
    cosine_similarity(a.as_slice(), b.as_slice()).map(|cos| (cos + 1.0) / 2.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_vectors_score_one() {
        let a = Embedding::new(vec![1.0, 0.0, 0.0]);

        let sim = similarity(&a, &a.clone()).unwrap();

        assert!((sim - 1.0).abs() < 1e-12);
    }

    #[test]
    fn opposite_vectors_score_zero_and_orthogonal_half() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![-1.0, 0.0]);
        let c = Embedding::new(vec![0.0, 1.0]);

        assert!(similarity(&a, &b).unwrap().abs() < 1e-12);
        assert!((similarity(&a, &c).unwrap() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn similarity_is_symmetric() {
        let a = Embedding::new(vec![0.3, -0.2, 0.9, 0.1]);
        let b = Embedding::new(vec![0.1, 0.4, 0.7, -0.5]);

        assert_eq!(similarity(&a, &b), similarity(&b, &a));
    }

    #[test]
    fn zero_vectors_give_no_signal() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[0.0, 0.0]), None);
        assert_eq!(cosine_similarity(&[], &[]), None);
    }

    #[test]
    fn dimension_mismatch_gives_no_signal() {
        assert_eq!(cosine_similarity(&[1.0, 0.0, 0.0], &[1.0, 0.0]), None);
    }
}
