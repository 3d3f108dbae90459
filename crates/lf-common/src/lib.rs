pub mod api;
pub mod embedding;
pub mod enrichment;
pub mod geo;
pub mod images;
pub mod logging;
pub mod matching;
pub mod post;
pub mod service;
pub mod store;

#[cfg(test)]
mod test_env;

pub use embedding::{Embedding, EmbeddingProvider, HttpEmbeddingProvider, ProviderConfig, ProviderError};
pub use enrichment::{EnrichmentConfig, EnrichmentMode};
pub use geo::GeoPoint;
pub use images::{ImageStore, LocalImageStore, UploadedImage};
pub use matching::{MatchCandidate, MatchQuery, MatchingEngine, RankingConfig};
pub use post::{Location, NewPost, Post, PostType, ValidationError};
pub use service::{PostFilter, PostService, ReembedSummary, ServiceError};
pub use store::{InMemoryPostStore, PgPostStore, PostStore, StoreError};
