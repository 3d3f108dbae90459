pub mod memory;
pub mod migrations;
pub mod pool;
pub mod postgres;
pub mod util;

use async_trait::async_trait;
use deadpool_postgres::PoolError;
use thiserror::Error;
use tokio_postgres::Error as PgError;

use crate::{
    embedding::Embedding,
    geo::GeoPoint,
    post::{NewPost, Post},
};

pub use memory::InMemoryPostStore;
pub use migrations::{MigrationError, run_migrations};
pub use pool::{DbPoolError, PgPool, create_pool_from_url};
pub use postgres::PgPostStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to get postgres connection: {0}")]
    Pool(#[from] PoolError),
    #[error("postgres error: {0}")]
    Postgres(#[from] PgError),
    #[error("post not found: {0}")]
    NotFound(i64),
    #[error("failed to map post row: {0}")]
    Mapping(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Durable post collection. The only shared mutable resource of the service.
#[async_trait]
pub trait PostStore: Send + Sync {
    /// First write: persists the post without an embedding and assigns its id.
    async fn create(&self, post: NewPost) -> Result<Post, StoreError>;

    /// Second write of the two-phase ingestion. Targets the id created above.
    async fn update_embedding(&self, id: i64, embedding: &Embedding) -> Result<(), StoreError>;

    async fn get(&self, id: i64) -> Result<Option<Post>, StoreError>;

    /// Every post, oldest first.
    async fn get_all(&self) -> Result<Vec<Post>, StoreError>;

    /// Case-insensitive title substring lookup.
    async fn find_by_title_substring(&self, text: &str) -> Result<Vec<Post>, StoreError>;

    /// Posts whose location lies within `radius_meters` of `point`.
    async fn find_near(&self, point: GeoPoint, radius_meters: f64) -> Result<Vec<Post>, StoreError>;

    /// Posts with an image reference but no embedding yet, oldest first.
    async fn find_pending_enrichment(&self, limit: usize) -> Result<Vec<Post>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}
