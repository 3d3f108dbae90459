//! Second phase of ingestion: fetch the stored image, embed it and write the
//! vector back onto the post that was already created.
//!
//! Failures here never reach the caller that created the post. Every outcome
//! is logged and counted, and a post left without an embedding is a valid
//! final state.

use std::{sync::Arc, time::Duration};

use strum::{AsRefStr, EnumString};
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
};
use tracing::{info, instrument, warn};

use crate::{
    embedding::{EmbeddingProvider, ProviderError, embed_with_timeout},
    images::ImageStore,
    matching::config::{ConfigError, env_millis, env_parse},
    store::PostStore,
};

const DEFAULT_QUEUE_CAPACITY: usize = 256;
const DEFAULT_PROVIDER_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, EnumString)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum EnrichmentMode {
    /// Jobs go through a bounded queue drained by one worker task.
    Background,
    /// The creating request awaits enrichment before responding.
    Inline,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentConfig {
    pub mode: EnrichmentMode,
    pub queue_capacity: usize,
    /// Hard deadline around every provider call.
    pub provider_timeout: Duration,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            mode: EnrichmentMode::Background,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            provider_timeout: Duration::from_millis(DEFAULT_PROVIDER_TIMEOUT_MS),
        }
    }
}

impl EnrichmentConfig {
    /// Reads `LF_ENRICHMENT_MODE`, `LF_ENRICHMENT_QUEUE_CAPACITY` and
    /// `LF_EMBEDDING_TIMEOUT_MS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let queue_capacity = env_parse::<usize>("LF_ENRICHMENT_QUEUE_CAPACITY")?
            .unwrap_or(defaults.queue_capacity);
        if queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                name: "LF_ENRICHMENT_QUEUE_CAPACITY",
                value: "0".into(),
            });
        }

        let provider_timeout = env_millis("LF_EMBEDDING_TIMEOUT_MS", defaults.provider_timeout)?;

        Ok(Self {
            mode: env_parse("LF_ENRICHMENT_MODE")?.unwrap_or(defaults.mode),
            queue_capacity,
            provider_timeout,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichmentJob {
    pub post_id: i64,
    pub image_ref: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnrichmentOutcome {
    Embedded { dimension: usize },
    ImageUnavailable,
    ProviderFailed(ProviderError),
    StoreFailed(String),
}

impl EnrichmentOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            EnrichmentOutcome::Embedded { .. } => "embedded",
            EnrichmentOutcome::ImageUnavailable => "image_unavailable",
            EnrichmentOutcome::ProviderFailed(_) => "provider_failed",
            EnrichmentOutcome::StoreFailed(_) => "store_failed",
        }
    }

    pub fn is_embedded(&self) -> bool {
        matches!(self, EnrichmentOutcome::Embedded { .. })
    }
}

#[derive(Clone)]
pub struct Enricher {
    store: Arc<dyn PostStore>,
    provider: Arc<dyn EmbeddingProvider>,
    images: Arc<dyn ImageStore>,
    deadline: Duration,
}

impl Enricher {
    pub fn new(
        store: Arc<dyn PostStore>,
        provider: Arc<dyn EmbeddingProvider>,
        images: Arc<dyn ImageStore>,
        deadline: Duration,
    ) -> Self {
        Self {
            store,
            provider,
            images,
            deadline,
        }
    }

    /// Runs one job to completion. Never fails; the outcome says what happened.
    #[instrument(skip(self, job), fields(post_id = job.post_id))]
    pub async fn enrich(&self, job: &EnrichmentJob) -> EnrichmentOutcome {
        let outcome = self.run(job).await;
        record_outcome(job, &outcome);
        outcome
    }

    async fn run(&self, job: &EnrichmentJob) -> EnrichmentOutcome {
        let bytes = match self.images.fetch(&job.image_ref).await {
            Ok(Some(bytes)) if !bytes.is_empty() => bytes,
            Ok(_) => return EnrichmentOutcome::ImageUnavailable,
            Err(err) => {
                warn!(error = %err, "failed to read stored image");
                return EnrichmentOutcome::ImageUnavailable;
            }
        };

        let embedding =
            match embed_with_timeout(self.provider.as_ref(), &bytes, self.deadline).await {
                Ok(embedding) => embedding,
                Err(err) => return EnrichmentOutcome::ProviderFailed(err),
            };

        let dimension = embedding.dimension();
        match self.store.update_embedding(job.post_id, &embedding).await {
            Ok(()) => EnrichmentOutcome::Embedded { dimension },
            Err(err) => EnrichmentOutcome::StoreFailed(err.to_string()),
        }
    }
}

fn record_outcome(job: &EnrichmentJob, outcome: &EnrichmentOutcome) {
    metrics::counter!("lf_enrichment_outcomes_total", "outcome" => outcome.label()).increment(1);

    match outcome {
        EnrichmentOutcome::Embedded { dimension } => {
            info!(post_id = job.post_id, dimension, "post enriched with embedding");
        }
        EnrichmentOutcome::ImageUnavailable => {
            info!(
                post_id = job.post_id,
                image_ref = %job.image_ref,
                "image not retrievable; post stays without embedding"
            );
        }
        EnrichmentOutcome::ProviderFailed(err) => {
            warn!(post_id = job.post_id, kind = err.kind(), error = %err, "enrichment skipped");
        }
        EnrichmentOutcome::StoreFailed(err) => {
            warn!(post_id = job.post_id, error = %err, "failed to store embedding");
        }
    }
}

/// Bounded hand-off from request handlers to the enrichment worker.
#[derive(Clone)]
pub struct EnrichmentQueue {
    tx: mpsc::Sender<EnrichmentJob>,
}

impl EnrichmentQueue {
    /// Starts the worker. It stops once every queue handle is dropped.
    pub fn spawn(enricher: Enricher, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(run_worker(enricher, rx));
        (Self { tx }, handle)
    }

    /// Jobs accepted but not yet picked up by the worker.
    pub fn pending(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Returns `false` when the job was dropped.
    pub fn enqueue(&self, job: EnrichmentJob) -> bool {
        match self.tx.try_send(job) {
            Ok(()) => true,
            Err(TrySendError::Full(job)) => {
                metrics::counter!("lf_enrichment_dropped_total", "reason" => "queue_full")
                    .increment(1);
                warn!(post_id = job.post_id, "enrichment queue full; job dropped");
                false
            }
            Err(TrySendError::Closed(job)) => {
                metrics::counter!("lf_enrichment_dropped_total", "reason" => "worker_stopped")
                    .increment(1);
                warn!(post_id = job.post_id, "enrichment worker stopped; job dropped");
                false
            }
        }
    }
}

async fn run_worker(enricher: Enricher, mut rx: mpsc::Receiver<EnrichmentJob>) {
    info!("enrichment worker started");
    while let Some(job) = rx.recv().await {
        enricher.enrich(&job).await;
    }
    info!("enrichment worker stopped");
}
