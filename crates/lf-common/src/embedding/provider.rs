use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use super::Embedding;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    #[error("embedding provider unavailable: {0}")]
    Unavailable(String),
    #[error("embedding provider timed out after {0:?}")]
    Timeout(Duration),
    #[error("malformed embedding response: {0}")]
    MalformedResponse(String),
}

impl ProviderError {
    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::Unavailable(_) => "unavailable",
            ProviderError::Timeout(_) => "timeout",
            ProviderError::MalformedResponse(_) => "malformed_response",
        }
    }
}

/// External image embedding model.
///
/// One call per invocation, no internal retry. Implementations classify
/// every failure into [`ProviderError`] instead of panicking.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Implementation name, recorded as a metrics label.
    fn name(&self) -> &'static str;

    async fn embed(&self, image: &[u8]) -> Result<Embedding, ProviderError>;
}

/// Validates `{"vector": [f, f, ...], ...}`.
///
/// Anything else (missing field, non-array, non-numeric or non-finite
/// entries, empty vector) is a malformed response.
pub fn parse_embedding_response(body: &Value) -> Result<Embedding, ProviderError> {
    let object = body
        .as_object()
        .ok_or_else(|| ProviderError::MalformedResponse("response is not a JSON object".into()))?;

    let values = object
        .get("vector")
        .ok_or_else(|| ProviderError::MalformedResponse("missing `vector` field".into()))?
        .as_array()
        .ok_or_else(|| ProviderError::MalformedResponse("`vector` is not an array".into()))?;

    if values.is_empty() {
        return Err(ProviderError::MalformedResponse("`vector` is empty".into()));
    }

    let vector = values
        .iter()
        .enumerate()
        .map(|(idx, value)| {
            value
                .as_f64()
                .filter(|v| v.is_finite())
                .map(|v| v as f32)
                .filter(|v| v.is_finite())
                .ok_or_else(|| {
                    ProviderError::MalformedResponse(format!("`vector[{idx}]` is not a finite number"))
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Embedding::new(vector))
}
