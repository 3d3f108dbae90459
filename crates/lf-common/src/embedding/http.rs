use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use tracing::{debug, instrument};

use super::{Embedding, EmbeddingProvider, ProviderError, parse_embedding_response};
use crate::matching::config::{ConfigError, env_millis, env_parse};

const DEFAULT_ENDPOINT: &str = "http://localhost:8000/embed";
const DEFAULT_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Multipart endpoint, e.g. `http://localhost:8000/embed`.
    pub endpoint: String,
    /// Upper bound for one request, connect included.
    pub timeout: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.into(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }
}

impl ProviderConfig {
    /// Reads `LF_EMBEDDING_URL` and `LF_EMBEDDING_TIMEOUT_MS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            endpoint: env_parse::<String>("LF_EMBEDDING_URL")?
                .map(|url| url.trim().to_string())
                .unwrap_or(defaults.endpoint),
            timeout: env_millis("LF_EMBEDDING_TIMEOUT_MS", defaults.timeout)?,
        })
    }
}

/// Sends the image as the `file` field of a multipart POST and expects
/// `{"vector": [...]}` back.
pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    config: ProviderConfig,
}

impl HttpEmbeddingProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .build()
            .map_err(|err| ProviderError::Unavailable(format!("failed to build http client: {err}")))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn classify(&self, err: reqwest::Error) -> ProviderError {
        if err.is_timeout() {
            ProviderError::Timeout(self.config.timeout)
        } else if err.is_decode() {
            ProviderError::MalformedResponse(err.to_string())
        } else {
            ProviderError::Unavailable(err.to_string())
        }
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    fn name(&self) -> &'static str {
        "http"
    }

    #[instrument(skip(self, image), fields(endpoint = %self.config.endpoint, bytes = image.len()))]
    async fn embed(&self, image: &[u8]) -> Result<Embedding, ProviderError> {
        let form = Form::new().part("file", Part::bytes(image.to_vec()).file_name("image"));

        let response = self
            .client
            .post(&self.config.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|err| self.classify(err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Unavailable(format!(
                "embedding endpoint returned status {status}"
            )));
        }

        let body: Value = response.json().await.map_err(|err| self.classify(err))?;
        let embedding = parse_embedding_response(&body)?;

        debug!(dimension = embedding.dimension(), "embedding received");
        Ok(embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_env::with_envs;

    #[test]
    fn defaults_point_at_local_model_service() {
        let config = ProviderConfig::default();

        assert_eq!(config.endpoint, "http://localhost:8000/embed");
        assert_eq!(config.timeout, Duration::from_secs(10));
    }

    #[test]
    fn from_env_trims_url_and_rejects_malformed_timeout() {
        with_envs(
            &[
                ("LF_EMBEDDING_URL", Some(" http://model:9000/embed ")),
                ("LF_EMBEDDING_TIMEOUT_MS", Some("1500")),
            ],
            || {
                assert_eq!(
                    ProviderConfig::from_env(),
                    Ok(ProviderConfig {
                        endpoint: "http://model:9000/embed".into(),
                        timeout: Duration::from_millis(1_500),
                    })
                );
            },
        );

        with_envs(
            &[
                ("LF_EMBEDDING_URL", None),
                ("LF_EMBEDDING_TIMEOUT_MS", Some("ten seconds")),
            ],
            || {
                assert_eq!(
                    ProviderConfig::from_env(),
                    Err(ConfigError::Invalid {
                        name: "LF_EMBEDDING_TIMEOUT_MS",
                        value: "ten seconds".into(),
                    })
                );
            },
        );

        with_envs(
            &[("LF_EMBEDDING_URL", None), ("LF_EMBEDDING_TIMEOUT_MS", None)],
            || assert_eq!(ProviderConfig::from_env(), Ok(ProviderConfig::default())),
        );
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_classified_not_raised() {
        let provider = HttpEmbeddingProvider::new(ProviderConfig {
            endpoint: "http://127.0.0.1:9/embed".into(),
            timeout: Duration::from_secs(2),
        })
        .unwrap();
        assert_eq!(provider.config().timeout, Duration::from_secs(2));

        let err = provider.embed(b"not really a jpeg").await.unwrap_err();

        assert!(
            matches!(err, ProviderError::Unavailable(_) | ProviderError::Timeout(_)),
            "unexpected error: {err:?}"
        );
    }
}
