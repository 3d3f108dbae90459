pub mod http;
pub mod provider;
pub mod similarity;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

pub use http::{HttpEmbeddingProvider, ProviderConfig};
pub use provider::{EmbeddingProvider, ProviderError, parse_embedding_response};
pub use similarity::{cosine_similarity, similarity};

/// Image embedding as returned by the provider.
///
/// Dimensionality is whatever the provider returned for that image; nothing
/// assumes a fixed length, so comparisons check `dimension()` first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub vector: Vec<f32>,
}

impl Embedding {
    pub fn new(vector: Vec<f32>) -> Self {
        Self { vector }
    }

    pub fn dimension(&self) -> usize {
        self.vector.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.vector
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(vector: Vec<f32>) -> Self {
        Self::new(vector)
    }
}

/// Calls the provider under a hard deadline and records the outcome.
///
/// Provider-side timeouts and this deadline both surface as
/// [`ProviderError::Timeout`].
pub async fn embed_with_timeout(
    provider: &dyn EmbeddingProvider,
    image: &[u8],
    deadline: Duration,
) -> Result<Embedding, ProviderError> {
    let result = match tokio::time::timeout(deadline, provider.embed(image)).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Timeout(deadline)),
    };

    let outcome = match &result {
        Ok(_) => "ok",
        Err(err) => err.kind(),
    };
    metrics::counter!(
        "lf_embedding_requests_total",
        "provider" => provider.name(),
        "outcome" => outcome
    )
    .increment(1);

    if let Err(err) = &result {
        warn!(provider = provider.name(), kind = err.kind(), error = %err, "embedding request failed");
    }

    result
}
