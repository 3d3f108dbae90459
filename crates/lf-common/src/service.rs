use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::{
    api::PostRequest,
    embedding::{EmbeddingProvider, embed_with_timeout},
    enrichment::{
        EnrichmentConfig, EnrichmentJob, EnrichmentMode, EnrichmentQueue, Enricher,
    },
    geo::GeoPoint,
    images::{ImageStore, ImageStoreError, UploadedImage},
    matching::{MatchCandidate, MatchQuery, MatchingEngine, RankingConfig},
    post::{Post, PostType, ValidationError},
    store::{PostStore, StoreError},
};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("post not found: {0}")]
    NotFound(i64),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Image(#[from] ImageStoreError),
}

/// Listing filters for `list_posts`. All optional; they combine with AND.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostFilter {
    pub text: Option<String>,
    pub near: Option<(GeoPoint, f64)>,
    pub post_type: Option<PostType>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReembedSummary {
    pub scanned: usize,
    pub embedded: usize,
    pub failed: usize,
}

pub struct PostService {
    store: Arc<dyn PostStore>,
    provider: Arc<dyn EmbeddingProvider>,
    images: Arc<dyn ImageStore>,
    engine: MatchingEngine,
    enrichment: EnrichmentConfig,
    enricher: Enricher,
    queue: Option<EnrichmentQueue>,
}

impl PostService {
    /// In background mode this spawns the enrichment worker, so it must run
    /// inside a tokio runtime.
    pub fn new(
        store: Arc<dyn PostStore>,
        provider: Arc<dyn EmbeddingProvider>,
        images: Arc<dyn ImageStore>,
        ranking: RankingConfig,
        enrichment: EnrichmentConfig,
    ) -> Self {
        let enricher = Enricher::new(
            store.clone(),
            provider.clone(),
            images.clone(),
            enrichment.provider_timeout,
        );

        let queue = match enrichment.mode {
            EnrichmentMode::Background => {
                let (queue, _worker) =
                    EnrichmentQueue::spawn(enricher.clone(), enrichment.queue_capacity);
                Some(queue)
            }
            EnrichmentMode::Inline => None,
        };

        info!(
            mode = enrichment.mode.as_ref(),
            provider = provider.name(),
            radius_meters = ranking.radius_meters,
            proximity_mode = ranking.proximity_mode.as_ref(),
            "post service ready"
        );

        Self {
            store,
            provider,
            images,
            engine: MatchingEngine::new(ranking),
            enrichment,
            enricher,
            queue,
        }
    }

    pub fn ranking_config(&self) -> &RankingConfig {
        self.engine.config()
    }

    pub fn enrichment_mode(&self) -> EnrichmentMode {
        self.enrichment.mode
    }

    /// Queued background jobs; always 0 in inline mode.
    pub fn pending_enrichment(&self) -> usize {
        self.queue.as_ref().map_or(0, EnrichmentQueue::pending)
    }

    /// Validates and stores the post, then schedules enrichment.
    ///
    /// The returned post is the first write: it never carries an embedding,
    /// and enrichment failures never surface here.
    #[instrument(skip(self, request, image))]
    pub async fn submit_post(
        &self,
        request: PostRequest,
        image: Option<UploadedImage>,
    ) -> Result<Post, ServiceError> {
        let mut new_post = request.into_new_post()?;

        let mut uploaded = None;
        if let Some(image) = image.filter(|image| !image.bytes.is_empty()) {
            let reference = self.images.put(&image.file_name, &image.bytes).await?;
            new_post.image_url = Some(reference.clone());
            uploaded = Some(reference);
        }

        let post = match self.store.create(new_post).await {
            Ok(post) => post,
            Err(err) => {
                if let Some(reference) = uploaded {
                    self.discard_upload(&reference).await;
                }
                return Err(err.into());
            }
        };
        info!(post_id = post.id, post_type = post.post_type.as_str(), "post created");

        if let Some(image_ref) = post.image_ref() {
            let job = EnrichmentJob {
                post_id: post.id,
                image_ref: image_ref.to_string(),
            };
            self.schedule_enrichment(job).await;
        }

        Ok(post)
    }

    async fn discard_upload(&self, reference: &str) {
        if let Err(err) = self.images.delete(reference).await {
            warn!(error = %err, "failed to remove upload of rejected post");
        }
    }

    async fn schedule_enrichment(&self, job: EnrichmentJob) {
        match &self.queue {
            Some(queue) => {
                if queue.enqueue(job) {
                    debug!("enrichment queued");
                }
            }
            None => {
                self.enricher.enrich(&job).await;
            }
        }
    }

    pub async fn get_post(&self, id: i64) -> Result<Post, ServiceError> {
        self.store.get(id).await?.ok_or(ServiceError::NotFound(id))
    }

    /// Newest first.
    #[instrument(skip(self))]
    pub async fn list_posts(&self, filter: &PostFilter) -> Result<Vec<Post>, ServiceError> {
        let text = filter
            .text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty());

        let mut posts = match (text, filter.near) {
            (Some(text), _) => self.store.find_by_title_substring(text).await?,
            (None, Some((point, radius))) => self.store.find_near(point, radius).await?,
            (None, None) => self.store.get_all().await?,
        };

        if let (Some(_), Some((point, radius))) = (text, filter.near) {
            posts.retain(|post| post.point().is_some_and(|p| p.within(&point, radius)));
        }
        if let Some(post_type) = filter.post_type {
            posts.retain(|post| post.post_type == post_type);
        }

        posts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(posts)
    }

    /// Ranks every stored post against `query`.
    pub async fn find_matches(&self, query: &MatchQuery) -> Result<Vec<MatchCandidate>, ServiceError> {
        let posts = self.store.get_all().await?;
        Ok(self.engine.find_matches(query, posts))
    }

    /// Opposite-type candidates for a stored post, the post itself excluded.
    #[instrument(skip(self))]
    pub async fn find_matches_for_post(&self, id: i64) -> Result<Vec<MatchCandidate>, ServiceError> {
        let post = self.get_post(id).await?;
        if post.embedding.is_none() {
            debug!(post_id = id, "matching without embedding; fallback signals only");
        }
        self.find_matches(&MatchQuery::for_post(&post)).await
    }

    /// Embeds the query image and ranks all posts.
    ///
    /// A failed embedding degrades to category/location ranking.
    #[instrument(skip(self, image), fields(len = image.len()))]
    pub async fn rank_by_image(
        &self,
        image: &[u8],
        location: Option<GeoPoint>,
        category: Option<String>,
    ) -> Result<Vec<MatchCandidate>, ServiceError> {
        if image.is_empty() {
            return Err(ValidationError::MissingField("file").into());
        }
        if let Some(point) = location.filter(|p| !p.is_valid()) {
            return Err(ValidationError::InvalidLocation {
                lat: point.lat.to_string(),
                lng: point.lng.to_string(),
            }
            .into());
        }

        let embedding =
            match embed_with_timeout(self.provider.as_ref(), image, self.enrichment.provider_timeout)
                .await
            {
                Ok(embedding) => Some(embedding),
                Err(err) => {
                    warn!(kind = err.kind(), "image search without similarity signal");
                    None
                }
            };

        let query = MatchQuery {
            embedding,
            location,
            category: category.map(|c| c.trim().to_string()).filter(|c| !c.is_empty()),
            ..MatchQuery::default()
        };
        self.find_matches(&query).await
    }

    pub async fn search_by_image(
        &self,
        image: &[u8],
        location: Option<GeoPoint>,
        category: Option<String>,
    ) -> Result<Vec<Post>, ServiceError> {
        let ranked = self.rank_by_image(image, location, category).await?;
        Ok(ranked.into_iter().map(|candidate| candidate.post).collect())
    }

    /// Re-runs enrichment inline for posts still missing an embedding.
    #[instrument(skip(self))]
    pub async fn reembed_pending(&self, limit: usize) -> Result<ReembedSummary, ServiceError> {
        let pending = self.store.find_pending_enrichment(limit).await?;
        let mut summary = ReembedSummary {
            scanned: pending.len(),
            ..ReembedSummary::default()
        };

        for post in pending {
            let Some(image_ref) = post.image_ref() else {
                continue;
            };
            let job = EnrichmentJob {
                post_id: post.id,
                image_ref: image_ref.to_string(),
            };
            if self.enricher.enrich(&job).await.is_embedded() {
                summary.embedded += 1;
            } else {
                summary.failed += 1;
            }
        }

        info!(
            scanned = summary.scanned,
            embedded = summary.embedded,
            failed = summary.failed,
            "re-embedding pass finished"
        );
        Ok(summary)
    }

    pub async fn ping(&self) -> Result<(), ServiceError> {
        self.store.ping().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::{
        embedding::{Embedding, ProviderError},
        images::LocalImageStore,
        post::{Location, NewPost},
        store::InMemoryPostStore,
    };

    struct FixedProvider(Vec<f32>);

    #[async_trait]
    impl EmbeddingProvider for FixedProvider {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn embed(&self, _image: &[u8]) -> Result<Embedding, ProviderError> {
            Ok(Embedding::new(self.0.clone()))
        }
    }

    struct TimeoutProvider;

    #[async_trait]
    impl EmbeddingProvider for TimeoutProvider {
        fn name(&self) -> &'static str {
            "timeout"
        }

        async fn embed(&self, _image: &[u8]) -> Result<Embedding, ProviderError> {
            Err(ProviderError::Timeout(Duration::from_millis(5)))
        }
    }

    struct MalformedProvider;

    #[async_trait]
    impl EmbeddingProvider for MalformedProvider {
        fn name(&self) -> &'static str {
            "malformed"
        }

        async fn embed(&self, _image: &[u8]) -> Result<Embedding, ProviderError> {
            Err(ProviderError::MalformedResponse("expected vector".into()))
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl PostStore for BrokenStore {
        async fn create(&self, _post: NewPost) -> Result<Post, StoreError> {
            Err(StoreError::Unavailable("disk full".into()))
        }
        async fn update_embedding(&self, id: i64, _e: &Embedding) -> Result<(), StoreError> {
            Err(StoreError::NotFound(id))
        }
        async fn get(&self, _id: i64) -> Result<Option<Post>, StoreError> {
            Ok(None)
        }
        async fn get_all(&self) -> Result<Vec<Post>, StoreError> {
            Err(StoreError::Unavailable("disk full".into()))
        }
        async fn find_by_title_substring(&self, _text: &str) -> Result<Vec<Post>, StoreError> {
            Ok(Vec::new())
        }
        async fn find_near(&self, _p: GeoPoint, _r: f64) -> Result<Vec<Post>, StoreError> {
            Ok(Vec::new())
        }
        async fn find_pending_enrichment(&self, _limit: usize) -> Result<Vec<Post>, StoreError> {
            Ok(Vec::new())
        }
        async fn ping(&self) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("disk full".into()))
        }
    }

    struct Fixture {
        service: PostService,
        store: Arc<InMemoryPostStore>,
        _dir: tempfile::TempDir,
    }

    fn fixture(provider: Arc<dyn EmbeddingProvider>, mode: EnrichmentMode) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryPostStore::new());
        let service = PostService::new(
            store.clone(),
            provider,
            Arc::new(LocalImageStore::new(dir.path()).unwrap()),
            RankingConfig::default(),
            EnrichmentConfig {
                mode,
                queue_capacity: 8,
                provider_timeout: Duration::from_secs(1),
            },
        );
        Fixture {
            service,
            store,
            _dir: dir,
        }
    }

    fn request(title: &str, post_type: &str, category: &str) -> PostRequest {
        PostRequest {
            title: Some(title.into()),
            post_type: Some(post_type.into()),
            category: Some(category.into()),
            user_id: Some("u1".into()),
            location: Some(Location {
                lat: 12.97,
                lng: 77.59,
                name: None,
            }),
            ..PostRequest::default()
        }
    }

    fn image() -> Option<UploadedImage> {
        Some(UploadedImage {
            file_name: "photo.jpg".into(),
            bytes: b"jpeg".to_vec(),
        })
    }

    #[tokio::test]
    async fn post_without_image_is_created_and_never_embedded() {
        let fx = fixture(Arc::new(FixedProvider(vec![1.0, 0.0])), EnrichmentMode::Inline);

        let post = fx
            .service
            .submit_post(request("Keys", "LOST", "keys"), None)
            .await
            .unwrap();

        let stored = fx.store.get(post.id).await.unwrap().unwrap();
        assert!(stored.embedding.is_none());
        assert!(stored.image_url.is_none());
    }

    #[tokio::test]
    async fn inline_enrichment_stores_provider_vector() {
        let fx = fixture(Arc::new(FixedProvider(vec![0.3, 0.4])), EnrichmentMode::Inline);

        let post = fx
            .service
            .submit_post(request("Wallet", "FOUND", "wallet"), image())
            .await
            .unwrap();

        assert!(post.embedding.is_none());
        let stored = fx.service.get_post(post.id).await.unwrap();
        assert_eq!(stored.embedding.unwrap().vector, vec![0.3, 0.4]);
        assert_eq!(fx.service.pending_enrichment(), 0);
    }

    #[tokio::test]
    async fn background_enrichment_eventually_lands() {
        let fx = fixture(Arc::new(FixedProvider(vec![1.0, 2.0, 3.0])), EnrichmentMode::Background);

        let post = fx
            .service
            .submit_post(request("Wallet", "FOUND", "wallet"), image())
            .await
            .unwrap();

        let mut embedded = None;
        for _ in 0..100 {
            embedded = fx.store.get(post.id).await.unwrap().unwrap().embedding;
            if embedded.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(embedded.map(|e| e.dimension()), Some(3));
    }

    #[tokio::test]
    async fn provider_timeout_never_fails_creation() {
        let fx = fixture(Arc::new(TimeoutProvider), EnrichmentMode::Inline);

        let post = fx
            .service
            .submit_post(request("Phone", "LOST", "electronics"), image())
            .await
            .unwrap();

        let listed = fx.service.list_posts(&PostFilter::default()).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, post.id);
        assert!(listed[0].embedding.is_none());
    }

    #[tokio::test]
    async fn validation_errors_are_surfaced() {
        let fx = fixture(Arc::new(TimeoutProvider), EnrichmentMode::Inline);
        let guest = PostRequest {
            user_id: Some("guest".into()),
            ..request("Phone", "LOST", "electronics")
        };

        let result = fx.service.submit_post(guest, None).await;

        assert!(matches!(
            result,
            Err(ServiceError::Validation(ValidationError::Unauthenticated))
        ));
        assert!(fx.store.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn store_failure_is_fatal_to_creation() {
        let dir = tempfile::tempdir().unwrap();
        let service = PostService::new(
            Arc::new(BrokenStore),
            Arc::new(TimeoutProvider),
            Arc::new(LocalImageStore::new(dir.path()).unwrap()),
            RankingConfig::default(),
            EnrichmentConfig {
                mode: EnrichmentMode::Inline,
                ..EnrichmentConfig::default()
            },
        );

        let result = service.submit_post(request("Phone", "LOST", "x"), image()).await;

        assert!(matches!(result, Err(ServiceError::Store(_))));
        assert!(service.ping().await.is_err());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn malformed_provider_degrades_image_search() {
        let fx = fixture(Arc::new(MalformedProvider), EnrichmentMode::Inline);
        fx.service
            .submit_post(request("Umbrella", "FOUND", "other"), None)
            .await
            .unwrap();
        fx.service
            .submit_post(request("Wallet", "FOUND", "wallet"), None)
            .await
            .unwrap();

        let ranked = fx
            .service
            .rank_by_image(b"query", None, Some("wallet".into()))
            .await
            .unwrap();

        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].post.title, "Wallet");
        assert!(ranked.iter().all(|c| c.breakdown.similarity.is_none()));
    }

    #[tokio::test]
    async fn image_search_rejects_empty_upload() {
        let fx = fixture(Arc::new(MalformedProvider), EnrichmentMode::Inline);

        let result = fx.service.search_by_image(b"", None, None).await;

        assert!(matches!(
            result,
            Err(ServiceError::Validation(ValidationError::MissingField("file")))
        ));
    }

    #[tokio::test]
    async fn matches_for_post_exclude_same_type_and_self() {
        let fx = fixture(Arc::new(FixedProvider(vec![1.0, 0.0, 0.0])), EnrichmentMode::Inline);
        let lost = fx
            .service
            .submit_post(request("Black wallet", "LOST", "wallet"), image())
            .await
            .unwrap();
        fx.service
            .submit_post(request("Another lost wallet", "LOST", "wallet"), image())
            .await
            .unwrap();
        let found = fx
            .service
            .submit_post(request("Wallet found", "FOUND", "wallet"), image())
            .await
            .unwrap();

        let matches = fx.service.find_matches_for_post(lost.id).await.unwrap();

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].post.id, found.id);
        assert!(matches!(
            fx.service.find_matches_for_post(9_999).await,
            Err(ServiceError::NotFound(9_999))
        ));
    }

    #[tokio::test]
    async fn list_posts_filters_and_orders_newest_first() {
        let fx = fixture(Arc::new(TimeoutProvider), EnrichmentMode::Inline);
        for (title, post_type) in [("Red wallet", "LOST"), ("Blue wallet", "FOUND"), ("Keys", "FOUND")] {
            fx.store
                .create(request(title, post_type, "x").into_new_post().unwrap())
                .await
                .unwrap();
        }

        let wallets = fx
            .service
            .list_posts(&PostFilter {
                text: Some("WALLET".into()),
                ..PostFilter::default()
            })
            .await
            .unwrap();
        let found = fx
            .service
            .list_posts(&PostFilter {
                post_type: Some(PostType::Found),
                ..PostFilter::default()
            })
            .await
            .unwrap();

        assert_eq!(wallets.len(), 2);
        assert_eq!(
            found.iter().map(|p| p.title.as_str()).collect::<Vec<_>>(),
            vec!["Keys", "Blue wallet"]
        );
    }

    #[tokio::test]
    async fn reembed_pending_counts_outcomes() {
        let fx = fixture(Arc::new(TimeoutProvider), EnrichmentMode::Inline);
        fx.service
            .submit_post(request("Bag", "FOUND", "bags"), image())
            .await
            .unwrap();

        let summary = fx.service.reembed_pending(10).await.unwrap();

        assert_eq!(
            summary,
            ReembedSummary {
                scanned: 1,
                embedded: 0,
                failed: 1
            }
        );
    }
}
